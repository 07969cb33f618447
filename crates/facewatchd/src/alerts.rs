//! Unknown-person alerts, delivered by an external command.
//!
//! The pipeline hands alerts to a queue and never waits on delivery. The
//! delivery task runs the configured command through `sh -c` once per
//! recipient, with the message body on stdin and these variables set:
//! `FACEWATCH_ALERT_CHANNEL` (`sms` or `email`), `FACEWATCH_ALERT_RECIPIENT`,
//! `FACEWATCH_ALERT_SUBJECT` and, when a context image exists,
//! `FACEWATCH_ALERT_IMAGE` (path to a JPEG file).

use chrono::{DateTime, Utc};
use facewatch_core::{DetectionRecord, EncodedImage, Expression};
use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const EMAIL_SUBJECT: &str = "Security Alert: Unknown Person Detected";

const QUEUE_DEPTH: usize = 16;

#[derive(Debug, Clone)]
pub struct Alert {
    pub detection_id: String,
    pub timestamp: DateTime<Utc>,
    pub distance_m: f32,
    pub confidence: f32,
    pub expression: Expression,
    pub context_image: Option<EncodedImage>,
}

impl Alert {
    pub fn from_detection(detection: &DetectionRecord) -> Self {
        Self {
            detection_id: detection.id.clone(),
            timestamp: detection.timestamp,
            distance_m: detection.estimated_distance_meters,
            confidence: detection.confidence,
            expression: detection.dominant_expression,
            context_image: detection.context_image.clone(),
        }
    }

    pub fn sms_text(&self, camera_label: &str) -> String {
        format!("Alert: An unknown person has been detected. {camera_label} Please check immediately.")
    }

    pub fn email_body(&self, camera_label: &str) -> String {
        format!(
            "Unknown person detected at {time} ({camera_label})\n\
             Distance: ~{distance:.1}m\n\
             Confidence: {confidence:.2}\n\
             Expression: {expression}\n\
             \n\
             This is an automated security alert. Please check your surveillance system.\n",
            time = self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            distance = self.distance_m,
            confidence = self.confidence,
            expression = self.expression,
        )
    }
}

#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub command: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub camera_label: String,
}

/// Non-blocking handle to the delivery queue.
#[derive(Clone)]
pub struct AlertSender {
    tx: mpsc::Sender<Alert>,
}

impl AlertSender {
    /// Queue an alert. A full or closed queue drops it with a warning.
    pub fn send(&self, alert: Alert) {
        if let Err(e) = self.tx.try_send(alert) {
            tracing::warn!(error = %e, "alert dropped");
        }
    }
}

/// Bounded alert queue. The receiving end is drained by the delivery task.
pub fn alert_queue() -> (AlertSender, mpsc::Receiver<Alert>) {
    let (tx, rx) = mpsc::channel::<Alert>(QUEUE_DEPTH);
    (AlertSender { tx }, rx)
}

/// Spawn the delivery task on the current runtime.
pub fn spawn_alert_task(config: AlertConfig) -> (AlertSender, JoinHandle<()>) {
    let (sender, mut rx) = alert_queue();
    let task = tokio::spawn(async move {
        while let Some(alert) = rx.recv().await {
            deliver(&config, &alert).await;
        }
        tracing::debug!("alert task exiting");
    });
    (sender, task)
}

enum Channel {
    Sms,
    Email,
}

impl Channel {
    fn as_str(&self) -> &'static str {
        match self {
            Channel::Sms => "sms",
            Channel::Email => "email",
        }
    }
}

/// Send one alert to every configured recipient. Failures are logged.
pub async fn deliver(config: &AlertConfig, alert: &Alert) {
    // Removed when dropped at the end of delivery.
    let image_file = match &alert.context_image {
        Some(img) => write_image(img.0.clone()).await,
        None => None,
    };
    let image_path = image_file.as_ref().map(NamedTempFile::path);

    if let Some(phone) = &config.phone {
        let body = alert.sms_text(&config.camera_label);
        run_command(config, Channel::Sms, phone, "", &body, None).await;
    }
    if let Some(email) = &config.email {
        let body = alert.email_body(&config.camera_label);
        run_command(config, Channel::Email, email, EMAIL_SUBJECT, &body, image_path).await;
    }
}

async fn write_image(bytes: Vec<u8>) -> Option<NamedTempFile> {
    let written = tokio::task::spawn_blocking(move || -> std::io::Result<NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("facewatch-alert-")
            .suffix(".jpg")
            .tempfile()?;
        file.write_all(&bytes)?;
        file.flush()?;
        Ok(file)
    })
    .await;
    match written {
        Ok(Ok(file)) => Some(file),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "failed to write alert image");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "alert image writer panicked");
            None
        }
    }
}

async fn run_command(
    config: &AlertConfig,
    channel: Channel,
    recipient: &str,
    subject: &str,
    body: &str,
    image: Option<&Path>,
) {
    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c")
        .arg(&config.command)
        .env("FACEWATCH_ALERT_CHANNEL", channel.as_str())
        .env("FACEWATCH_ALERT_RECIPIENT", recipient)
        .env("FACEWATCH_ALERT_SUBJECT", subject)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .kill_on_drop(true);
    if let Some(path) = image {
        cmd.env("FACEWATCH_ALERT_IMAGE", path);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::warn!(channel = channel.as_str(), error = %e, "failed to spawn alert command");
            return;
        }
    };

    if let Some(mut stdin) = child.stdin.take() {
        if let Err(e) = stdin.write_all(body.as_bytes()).await {
            tracing::warn!(channel = channel.as_str(), error = %e, "failed to write alert body");
        }
        // Dropping stdin closes the pipe so the command sees EOF.
    }

    match child.wait().await {
        Ok(status) if status.success() => {
            tracing::info!(channel = channel.as_str(), recipient, "alert delivered");
        }
        Ok(status) => {
            tracing::warn!(channel = channel.as_str(), recipient, %status, "alert command failed");
        }
        Err(e) => {
            tracing::warn!(channel = channel.as_str(), error = %e, "alert command did not finish");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(image: Option<EncodedImage>) -> Alert {
        Alert {
            detection_id: "face-test".into(),
            timestamp: DateTime::from_timestamp_millis(0).unwrap(),
            distance_m: 2.345,
            confidence: 0.876,
            expression: Expression::Sad,
            context_image: image,
        }
    }

    #[test]
    fn test_sms_text() {
        assert_eq!(
            alert(None).sms_text("Front Door"),
            "Alert: An unknown person has been detected. Front Door Please check immediately."
        );
    }

    #[test]
    fn test_email_body() {
        let body = alert(None).email_body("Camera 1");
        assert!(body.starts_with("Unknown person detected at 1970-01-01 00:00:00 UTC (Camera 1)"));
        assert!(body.contains("Distance: ~2.3m"));
        assert!(body.contains("Confidence: 0.88"));
        assert!(body.contains("Expression: sad"));
    }

    #[tokio::test]
    async fn test_deliver_runs_command_per_recipient() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().display().to_string();
        let config = AlertConfig {
            command: format!(
                "cat > \"{out}/$FACEWATCH_ALERT_CHANNEL.body\"; \
                 echo \"$FACEWATCH_ALERT_RECIPIENT|$FACEWATCH_ALERT_SUBJECT|${{FACEWATCH_ALERT_IMAGE:+image}}\" \
                 > \"{out}/$FACEWATCH_ALERT_CHANNEL.env\""
            ),
            phone: Some("+15550100".into()),
            email: Some("ops@example.com".into()),
            camera_label: "Lobby".into(),
        };

        deliver(&config, &alert(Some(EncodedImage(vec![0xff, 0xd8])))).await;

        let sms = std::fs::read_to_string(dir.path().join("sms.body")).unwrap();
        assert!(sms.contains("Lobby Please check immediately."));
        let sms_env = std::fs::read_to_string(dir.path().join("sms.env")).unwrap();
        assert_eq!(sms_env.trim(), "+15550100||");

        let email = std::fs::read_to_string(dir.path().join("email.body")).unwrap();
        assert!(email.contains("Expression: sad"));
        let email_env = std::fs::read_to_string(dir.path().join("email.env")).unwrap();
        assert_eq!(email_env.trim(), format!("ops@example.com|{EMAIL_SUBJECT}|image"));

        assert!(!std::env::temp_dir().join("facewatch-face-test.jpg").exists());
    }

    #[tokio::test]
    async fn test_alert_image_is_private_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().display().to_string();
        let config = AlertConfig {
            command: format!(
                "cp \"$FACEWATCH_ALERT_IMAGE\" \"{out}/copy.jpg\"; \
                 echo \"$FACEWATCH_ALERT_IMAGE\" > \"{out}/path\""
            ),
            phone: None,
            email: Some("ops@example.com".into()),
            camera_label: "Lobby".into(),
        };

        deliver(&config, &alert(Some(EncodedImage(vec![0xff, 0xd8, 0xff, 0xd9])))).await;

        assert_eq!(std::fs::read(dir.path().join("copy.jpg")).unwrap(), vec![0xff, 0xd8, 0xff, 0xd9]);
        let path = std::fs::read_to_string(dir.path().join("path")).unwrap();
        let path = std::path::PathBuf::from(path.trim());
        assert!(!path.ends_with("facewatch-face-test.jpg"));
        assert!(path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("facewatch-alert-")));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_failed_command_is_not_fatal() {
        let config = AlertConfig {
            command: "exit 3".into(),
            phone: Some("1".into()),
            email: None,
            camera_label: "x".into(),
        };
        deliver(&config, &alert(None)).await;
    }

    #[tokio::test]
    async fn test_sender_queues_to_task() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("sent");
        let (sender, task) = spawn_alert_task(AlertConfig {
            command: format!("cat > \"{}\"", marker.display()),
            phone: Some("1".into()),
            email: None,
            camera_label: "Yard".into(),
        });
        sender.send(alert(None));
        drop(sender);
        task.await.unwrap();
        assert!(std::fs::read_to_string(&marker).unwrap().contains("Yard"));
    }
}
