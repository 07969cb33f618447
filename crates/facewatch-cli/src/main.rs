use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "facewatch", about = "facewatch surveillance CLI")]
struct Cli {
    /// Talk to the daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start detection (restarts it if already running)
    Start,
    /// Stop detection and release the camera
    Stop,
    /// Show daemon status
    Status,
    /// List the most recent detections
    Detections {
        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },
    /// List notifications
    Notifications {
        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },
    /// Mark a notification as read
    Read {
        /// Notification ID
        id: String,
    },
    /// Delete all notifications
    ClearNotifications,
    /// List known faces
    Faces {
        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },
    /// Enroll the person from a recorded detection
    Add {
        /// Detection ID to take the face from
        detection_id: String,
        #[arg(short, long)]
        name: String,
        #[arg(short, long, default_value = "")]
        role: String,
        /// standard, restricted, admin or security
        #[arg(short, long, default_value = "standard")]
        access: String,
    },
    /// Enroll a person from a JSON file holding a 128-value face descriptor
    Enroll {
        #[arg(short, long)]
        name: String,
        #[arg(short, long, default_value = "")]
        role: String,
        #[arg(short, long, default_value = "standard")]
        access: String,
        /// File containing a JSON array of 128 numbers
        #[arg(short, long)]
        descriptor: std::path::PathBuf,
    },
    /// Remove a known face
    Remove {
        /// Known face ID to remove
        id: String,
    },
    /// Remove every known face
    ResetFaces {
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Show or change detection settings
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print the current settings
    Show,
    /// Change one or more settings
    Set {
        /// Detection range in meters (1-10, 0.5 steps)
        #[arg(long)]
        range: Option<f32>,
        /// Minimum detection confidence (0.1-0.9)
        #[arg(long)]
        confidence: Option<f32>,
        /// Scan frequency: low, medium or high
        #[arg(long)]
        frequency: Option<String>,
    },
}

#[zbus::proxy(
    interface = "org.facewatch.Facewatch1",
    default_service = "org.facewatch.Facewatch1",
    default_path = "/org/facewatch/Facewatch1"
)]
trait Facewatch {
    async fn start(&self) -> zbus::Result<()>;
    async fn stop(&self) -> zbus::Result<()>;
    async fn status(&self) -> zbus::Result<String>;
    async fn recent_detections(&self) -> zbus::Result<String>;
    async fn notifications(&self) -> zbus::Result<String>;
    async fn unread_count(&self) -> zbus::Result<u32>;
    async fn mark_notification_read(&self, id: &str) -> zbus::Result<bool>;
    async fn clear_notifications(&self) -> zbus::Result<()>;
    async fn list_known_faces(&self) -> zbus::Result<String>;
    async fn add_known_face(
        &self,
        detection_id: &str,
        name: &str,
        role: &str,
        access_level: &str,
    ) -> zbus::Result<String>;
    async fn enroll_known_face(&self, face_json: &str) -> zbus::Result<String>;
    async fn remove_known_face(&self, id: &str) -> zbus::Result<bool>;
    async fn reset_known_faces(&self) -> zbus::Result<u32>;
    async fn get_settings(&self) -> zbus::Result<String>;
    async fn update_settings(&self, patch_json: &str) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.system || std::env::var("FACEWATCH_BUS").as_deref() == Ok("system") {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("failed to connect to D-Bus")?;
    tracing::debug!(unique_name = ?conn.unique_name(), "connected to bus");
    let proxy = FacewatchProxy::new(&conn)
        .await
        .context("facewatchd not reachable")?;

    match cli.command {
        Commands::Start => {
            proxy.start().await?;
            println!("Detection started");
        }
        Commands::Stop => {
            proxy.stop().await?;
            println!("Detection stopped");
        }
        Commands::Status => {
            let status: Value = serde_json::from_str(&proxy.status().await?)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Detections { json } => {
            let detections: Value = serde_json::from_str(&proxy.recent_detections().await?)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&detections)?);
            } else {
                print_detections(&detections);
            }
        }
        Commands::Notifications { json } => {
            let notifications: Value = serde_json::from_str(&proxy.notifications().await?)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&notifications)?);
            } else {
                let unread = proxy.unread_count().await?;
                print_notifications(&notifications, unread);
            }
        }
        Commands::Read { id } => {
            if proxy.mark_notification_read(&id).await? {
                println!("Marked {id} as read");
            } else {
                bail!("no notification with id {id}");
            }
        }
        Commands::ClearNotifications => {
            proxy.clear_notifications().await?;
            println!("Notifications cleared");
        }
        Commands::Faces { json } => {
            let faces: Value = serde_json::from_str(&proxy.list_known_faces().await?)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&faces)?);
            } else {
                print_faces(&faces);
            }
        }
        Commands::Add {
            detection_id,
            name,
            role,
            access,
        } => {
            let face: Value =
                serde_json::from_str(&proxy.add_known_face(&detection_id, &name, &role, &access).await?)?;
            println!("Added {} as {}", name, str_field(&face, "id"));
        }
        Commands::Enroll {
            name,
            role,
            access,
            descriptor,
        } => {
            let raw = std::fs::read_to_string(&descriptor)
                .with_context(|| format!("failed to read {}", descriptor.display()))?;
            let values: Vec<f32> = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not a JSON array of numbers", descriptor.display()))?;
            let doc = json!({
                "name": name,
                "role": role,
                "accessLevel": access.to_ascii_lowercase(),
                "faceDescriptor": values,
            });
            let face: Value = serde_json::from_str(&proxy.enroll_known_face(&doc.to_string()).await?)?;
            println!("Enrolled {} as {}", name, str_field(&face, "id"));
        }
        Commands::Remove { id } => {
            if proxy.remove_known_face(&id).await? {
                println!("Removed {id}");
            } else {
                println!("No known face with id {id}");
            }
        }
        Commands::ResetFaces { yes } => {
            if !yes {
                bail!("this deletes every known face; pass --yes to confirm");
            }
            let removed = proxy.reset_known_faces().await?;
            println!("Removed {removed} known face(s)");
        }
        Commands::Settings { action } => match action.unwrap_or(SettingsAction::Show) {
            SettingsAction::Show => {
                let settings: Value = serde_json::from_str(&proxy.get_settings().await?)?;
                println!("{}", serde_json::to_string_pretty(&settings)?);
            }
            SettingsAction::Set {
                range,
                confidence,
                frequency,
            } => {
                let patch = settings_patch(range, confidence, frequency.as_deref());
                if patch.as_object().is_some_and(|o| o.is_empty()) {
                    bail!("nothing to change; pass --range, --confidence or --frequency");
                }
                let settings: Value =
                    serde_json::from_str(&proxy.update_settings(&patch.to_string()).await?)?;
                println!("{}", serde_json::to_string_pretty(&settings)?);
            }
        },
    }

    Ok(())
}

fn settings_patch(range: Option<f32>, confidence: Option<f32>, frequency: Option<&str>) -> Value {
    let mut patch = serde_json::Map::new();
    if let Some(range) = range {
        patch.insert("detectionRangeMeters".into(), json!(range));
    }
    if let Some(confidence) = confidence {
        patch.insert("minConfidence".into(), json!(confidence));
    }
    if let Some(frequency) = frequency {
        patch.insert("scanFrequency".into(), json!(frequency.to_ascii_lowercase()));
    }
    Value::Object(patch)
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("?")
}

fn f64_field(value: &Value, key: &str) -> f64 {
    value.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

fn print_detections(detections: &Value) {
    let Some(list) = detections.as_array().filter(|l| !l.is_empty()) else {
        println!("No detections");
        return;
    };
    for d in list {
        println!(
            "{}  {:<16} {:>5.1}m  conf {:.2}  {:<10} {}",
            str_field(d, "timestamp"),
            str_field(d, "personName"),
            f64_field(d, "estimatedDistanceMeters"),
            f64_field(d, "confidence"),
            str_field(d, "dominantExpression"),
            str_field(d, "id"),
        );
    }
}

fn print_notifications(notifications: &Value, unread: u32) {
    let Some(list) = notifications.as_array().filter(|l| !l.is_empty()) else {
        println!("No notifications");
        return;
    };
    println!("{unread} unread");
    for n in list {
        let marker = if n.get("isRead").and_then(Value::as_bool).unwrap_or(false) {
            ' '
        } else {
            '*'
        };
        println!(
            "{marker} {}  {}  {}",
            str_field(n, "timestamp"),
            str_field(n, "title"),
            str_field(n, "id"),
        );
        println!("    {}", str_field(n, "message"));
    }
}

fn print_faces(faces: &Value) {
    let Some(list) = faces.as_array().filter(|l| !l.is_empty()) else {
        println!("No known faces");
        return;
    };
    for f in list {
        println!(
            "{:<20} {:<16} {:<12} {:<10} added {}",
            str_field(f, "id"),
            str_field(f, "name"),
            str_field(f, "role"),
            str_field(f, "accessLevel"),
            str_field(f, "dateAdded"),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_patch_only_includes_given_fields() {
        let patch = settings_patch(Some(3.5), None, Some("LOW"));
        assert_eq!(
            patch,
            json!({ "detectionRangeMeters": 3.5, "scanFrequency": "low" })
        );
        assert_eq!(settings_patch(None, None, None), json!({}));
    }

    #[test]
    fn test_cli_parses_settings_set() {
        let cli = Cli::try_parse_from(["facewatch", "settings", "set", "--range", "2"]).unwrap();
        match cli.command {
            Commands::Settings {
                action: Some(SettingsAction::Set { range, confidence, frequency }),
            } => {
                assert_eq!(range, Some(2.0));
                assert!(confidence.is_none() && frequency.is_none());
            }
            _ => panic!("unexpected command"),
        }
    }

    #[test]
    fn test_str_field_fallback() {
        let v = json!({ "id": "person-1" });
        assert_eq!(str_field(&v, "id"), "person-1");
        assert_eq!(str_field(&v, "name"), "?");
    }
}
