use crate::types::{Descriptor, KnownFace, UNKNOWN_LABEL};

/// Maximum Euclidean distance for a descriptor to count as a match.
/// Lower is stricter.
pub const FACE_MATCH_THRESHOLD: f32 = 0.6;

/// Result of matching a probe descriptor against the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Matched person's name, or [`UNKNOWN_LABEL`].
    pub label: String,
    /// Distance to the nearest registry entry (infinite for an empty registry).
    pub distance: f32,
    /// Id of the matched registry entry, if any.
    pub face_id: Option<String>,
}

impl MatchResult {
    fn unknown(distance: f32) -> Self {
        Self {
            label: UNKNOWN_LABEL.to_string(),
            distance,
            face_id: None,
        }
    }

    pub fn is_known(&self) -> bool {
        self.face_id.is_some()
    }
}

/// Strategy for comparing a probe descriptor against the known-face registry.
pub trait Matcher {
    fn best_match(&self, probe: &Descriptor, known: &[KnownFace]) -> MatchResult;
}

/// Nearest-neighbour matcher over Euclidean descriptor distance.
///
/// Ties on distance resolve to the earliest registry entry.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub threshold: f32,
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self {
            threshold: FACE_MATCH_THRESHOLD,
        }
    }
}

impl Matcher for EuclideanMatcher {
    fn best_match(&self, probe: &Descriptor, known: &[KnownFace]) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, face) in known.iter().enumerate() {
            let dist = probe.euclidean_distance(&face.face_descriptor);
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_dist < self.threshold => MatchResult {
                label: known[idx].name.clone(),
                distance: best_dist,
                face_id: Some(known[idx].id.clone()),
            },
            _ => MatchResult::unknown(best_dist),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccessLevel, DESCRIPTOR_LEN};
    use chrono::Utc;

    fn face(id: &str, name: &str, fill: f32) -> KnownFace {
        KnownFace {
            id: id.into(),
            name: name.into(),
            role: "staff".into(),
            access_level: AccessLevel::Standard,
            date_added: Utc::now(),
            face_descriptor: Descriptor(vec![fill; DESCRIPTOR_LEN]),
            thumbnail: None,
        }
    }

    #[test]
    fn test_empty_registry_is_unknown() {
        let probe = Descriptor(vec![0.3; DESCRIPTOR_LEN]);
        let result = EuclideanMatcher::default().best_match(&probe, &[]);
        assert_eq!(result.label, UNKNOWN_LABEL);
        assert!(!result.is_known());
        assert!(result.distance.is_infinite());
    }

    #[test]
    fn test_self_match_has_zero_distance() {
        let known = vec![face("person-1", "alice", 0.25)];
        let result = EuclideanMatcher::default().best_match(&known[0].face_descriptor, &known);
        assert_eq!(result.label, "alice");
        assert_eq!(result.distance, 0.0);
        assert_eq!(result.face_id.as_deref(), Some("person-1"));
    }

    #[test]
    fn test_nearest_entry_wins() {
        let known = vec![
            face("person-1", "far", 0.0),
            face("person-2", "near", 0.1),
        ];
        // Distance to "near": sqrt(128 * 0.01^2) ≈ 0.113
        let probe = Descriptor(vec![0.11; DESCRIPTOR_LEN]);
        let result = EuclideanMatcher::default().best_match(&probe, &known);
        assert_eq!(result.label, "near");
        assert!(result.distance < 0.2);
    }

    #[test]
    fn test_beyond_threshold_is_unknown() {
        let known = vec![face("person-1", "alice", 0.0)];
        // Distance: sqrt(128 * 0.1^2) ≈ 1.13
        let probe = Descriptor(vec![0.1; DESCRIPTOR_LEN]);
        let result = EuclideanMatcher::default().best_match(&probe, &known);
        assert_eq!(result.label, UNKNOWN_LABEL);
        assert!(result.distance > FACE_MATCH_THRESHOLD);
    }

    #[test]
    fn test_exact_tie_prefers_first_entry() {
        let known = vec![
            face("person-1", "first", 0.0),
            face("person-2", "second", 0.0),
        ];
        let probe = Descriptor(vec![0.0; DESCRIPTOR_LEN]);
        let result = EuclideanMatcher::default().best_match(&probe, &known);
        assert_eq!(result.label, "first");
    }
}
