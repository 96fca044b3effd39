//! Typed ID definitions for broker resources.

use crate::define_id;

// =============================================================================
// Fleet
// =============================================================================

define_id!(NodeId, "node");

// =============================================================================
// Backing-service inventory
// =============================================================================

define_id!(InstanceId, "ins");
define_id!(BindingId, "bnd");

// =============================================================================
// Messaging
// =============================================================================

// Links a request to its reply across the asynchronous transport.
define_id!(CorrelationId, "corr");

// Names a private reply subject.
define_id!(InboxId, "inbox");

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_node_id_roundtrip() {
        let id = NodeId::new();
        let parsed: NodeId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!(id.to_string().starts_with("node_"));
    }

    #[test]
    fn test_instance_id_rejects_binding_prefix() {
        let binding = BindingId::new().to_string();
        let err = binding.parse::<InstanceId>().unwrap_err();
        assert!(matches!(err, crate::IdError::WrongKind { expected: "ins", .. }));
    }

    #[test]
    fn test_malformed_ids() {
        for raw in ["", "node01HV4Z2WQXKJNM8GPQY6VBKC3D", "_01HV4Z2WQXKJNM8GPQY6VBKC3D"] {
            let result: Result<NodeId, _> = raw.parse();
            assert!(matches!(result, Err(crate::IdError::Malformed(_))), "{raw:?}");
        }
    }

    #[test]
    fn test_invalid_ulid() {
        let result: Result<InstanceId, _> = "ins_invalid".parse();
        assert!(matches!(result, Err(crate::IdError::BadUlid { .. })));
    }

    #[test]
    fn test_json_is_plain_string() {
        let id = BindingId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let parsed: BindingId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_instance_ids_sortable() {
        let id1 = InstanceId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = InstanceId::new();
        assert!(id1 < id2);
    }

    #[test]
    fn test_all_id_prefixes_unique() {
        let prefixes = [
            NodeId::PREFIX,
            InstanceId::PREFIX,
            BindingId::PREFIX,
            CorrelationId::PREFIX,
            InboxId::PREFIX,
        ];

        let unique: std::collections::HashSet<_> = prefixes.iter().collect();
        assert_eq!(prefixes.len(), unique.len());
    }

    proptest! {
        #[test]
        fn prop_parse_accepts_any_ulid(raw in any::<u128>()) {
            let id = CorrelationId::from_ulid(crate::Ulid(raw));
            let parsed: CorrelationId = id.to_string().parse().unwrap();
            prop_assert_eq!(id, parsed);
        }
    }
}
