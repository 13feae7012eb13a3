//! Static message-type routing table.

use convoy_core::kinds;

/// Channel that receives every message whose type is not in the table.
pub const FALLBACK_CHANNEL: &str = "system";

const ROUTES: &[(&str, &[&str])] = &[
    (kinds::WORKFLOW_UPDATE, &["workflow"]),
    (kinds::AGENT_STATUS, &["system"]),
    (kinds::PERFORMANCE_ALERT, &["monitoring"]),
    (kinds::ERROR_REPORT, &["system"]),
    (kinds::TASK_COMPLETION, &["workflow", "coordination"]),
    (kinds::RESOURCE_REQUEST, &["coordination"]),
    (kinds::COORDINATION_REQUEST, &["coordination"]),
];

/// Channels a message type is routed to, or `None` for unknown types.
pub fn lookup(kind: &str) -> Option<&'static [&'static str]> {
    ROUTES
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, channels)| *channels)
}

/// Resolve target channels for a message.
///
/// Known types always follow the table. Unknown types go to their explicit
/// channel if one was given, otherwise to [`FALLBACK_CHANNEL`].
pub fn targets(kind: &str, explicit: Option<&str>) -> Vec<String> {
    match lookup(kind) {
        Some(channels) => channels.iter().map(|c| (*c).to_string()).collect(),
        None => vec![explicit.unwrap_or(FALLBACK_CHANNEL).to_string()],
    }
}

/// Every message type with a route.
pub fn known_kinds() -> impl Iterator<Item = &'static str> {
    ROUTES.iter().map(|(k, _)| *k)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_types_ignore_explicit_channel() {
        assert_eq!(targets("agent_status", Some("debug")), vec!["system"]);
        assert_eq!(
            targets("task_completion", None),
            vec!["workflow", "coordination"]
        );
    }

    #[test]
    fn test_unknown_types_default_to_system() {
        assert_eq!(targets("gossip", None), vec![FALLBACK_CHANNEL]);
        assert_eq!(targets("gossip", Some("debug")), vec!["debug"]);
    }

    #[test]
    fn test_every_route_has_a_channel() {
        for kind in known_kinds() {
            assert!(!lookup(kind).unwrap_or_default().is_empty(), "{kind}");
        }
    }
}
