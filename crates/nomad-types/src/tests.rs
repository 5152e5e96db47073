use super::*;
use proptest::prelude::*;
use test_case::test_case;

// ============================================================================
// HostPort
// ============================================================================

#[test_case("localhost:9410", "localhost", 9410; "hostname")]
#[test_case("10.0.0.1:1", "10.0.0.1", 1; "ipv4")]
#[test_case("[::1]:9410", "[::1]", 9410; "bracketed ipv6")]
fn host_port_parses(input: &str, host: &str, port: u16) {
    let parsed: HostPort = input.parse().unwrap();
    assert_eq!(parsed, HostPort::new(host, port));
    assert_eq!(parsed.to_string(), input);
}

#[test_case(""; "empty")]
#[test_case("localhost"; "missing port")]
#[test_case(":9410"; "missing host")]
#[test_case("localhost:99999"; "port out of range")]
#[test_case("localhost:abc"; "non numeric port")]
fn host_port_rejects_malformed_input(input: &str) {
    assert!(input.parse::<HostPort>().is_err());
}

// ============================================================================
// Counters
// ============================================================================

#[test]
fn version_next_increments_by_one() {
    assert_eq!(Version::ZERO.next(), Version::new(1));
    assert_eq!(Version::new(41).next().as_u64(), 42);
}

#[test]
fn mutative_message_count_next_increments_by_one() {
    let count = MutativeMessageCount::new(7);
    assert_eq!(count.next(), MutativeMessageCount::new(8));
    assert!(count < count.next());
}

#[test]
fn counters_saturate_instead_of_overflowing() {
    assert_eq!(Version::new(u64::MAX).next(), Version::new(u64::MAX));
    assert_eq!(
        MutativeMessageCount::new(u64::MAX).next(),
        MutativeMessageCount::new(u64::MAX)
    );
}

#[test]
fn change_uuids_are_unique() {
    assert_ne!(ChangeUuid::random(), ChangeUuid::random());
}

// ============================================================================
// ConfigHash
// ============================================================================

#[test]
fn config_hash_is_deterministic_for_equal_values() {
    let a = ConfigHash::of(&("cluster", 3u32)).unwrap();
    let b = ConfigHash::of(&("cluster", 3u32)).unwrap();
    assert_eq!(a, b);
}

#[test]
fn config_hash_differs_for_different_values() {
    let a = ConfigHash::of("offheap=1GB").unwrap();
    let b = ConfigHash::of("offheap=2GB").unwrap();
    assert_ne!(a, b);
}

#[test]
fn config_hash_display_is_full_hex() {
    let hash = ConfigHash::of_bytes(b"config");
    let rendered = hash.to_string();
    assert_eq!(rendered.len(), CONFIG_HASH_LENGTH * 2);
    assert!(rendered.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn config_hash_debug_is_truncated() {
    let rendered = format!("{:?}", ConfigHash::from_bytes([0xab; CONFIG_HASH_LENGTH]));
    assert_eq!(rendered, "ConfigHash(abababababababab...)");
}

// ============================================================================
// Responses
// ============================================================================

#[test]
fn accept_has_no_rejection() {
    let response = AcceptRejectResponse::accept();
    assert!(response.is_accepted());
    assert!(response.rejection().is_none());
}

#[test]
fn dead_rejection_carries_last_mutation() {
    let response =
        AcceptRejectResponse::reject_dead(Some("other-host".into()), Some("other-user".into()));
    let rejection = response.rejection().unwrap();
    assert_eq!(rejection.reason, RejectionReason::Dead);
    assert_eq!(rejection.last_mutation_host.as_deref(), Some("other-host"));
    assert_eq!(rejection.last_mutation_user.as_deref(), Some("other-user"));
}

#[test]
fn unacceptable_rejection_carries_message() {
    let response = AcceptRejectResponse::reject_unacceptable("offheap too small");
    let rejection = response.rejection().unwrap();
    assert_eq!(rejection.reason, RejectionReason::Unacceptable);
    assert_eq!(rejection.message.as_deref(), Some("offheap too small"));
}

#[test]
fn discover_response_serializes_through_json() {
    let response: DiscoverResponse<SimpleChange> = DiscoverResponse {
        mode: ServerMode::Accepting,
        mutative_message_count: MutativeMessageCount::new(2),
        last_mutation_host: Some("host".into()),
        last_mutation_user: Some("user".into()),
        last_mutation_timestamp: None,
        current_version: Version::new(1),
        highest_version: Version::new(1),
        latest_change: None,
        latest_committed_change: None,
    };

    let json = serde_json::to_string(&response).unwrap();
    let decoded: DiscoverResponse<SimpleChange> = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded, response);
    assert_eq!(decoded.latest_change_state(), None);
}

// ============================================================================
// Property tests
// ============================================================================

proptest! {
    #[test]
    fn host_port_display_parses_back(host in "[a-z][a-z0-9.-]{0,20}", port in any::<u16>()) {
        let address = HostPort::new(host, port);
        let parsed: HostPort = address.to_string().parse().unwrap();
        prop_assert_eq!(parsed, address);
    }

    #[test]
    fn config_hash_of_distinct_bytes_differs(a in prop::collection::vec(any::<u8>(), 0..64),
                                             b in prop::collection::vec(any::<u8>(), 0..64)) {
        prop_assume!(a != b);
        prop_assert_ne!(ConfigHash::of_bytes(&a), ConfigHash::of_bytes(&b));
    }
}
