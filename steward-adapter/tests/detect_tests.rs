//! Parameterised name detection tests for `steward-adapter`.

use rstest::rstest;
use steward_adapter::{descriptor_for, detect_event, detect_table, DetectError, Manifest};
use steward_core::{AdapterKind, EntityType};

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

#[rstest]
#[case("people", "person", "per")]
#[case("households", "household", "hh")]
#[case("emails", "email", "eml")]
#[case("phone_numbers", "phone_number", "phn")]
#[case("addresses", "address", "addr")]
#[case("campuses", "campus", "cmp")]
#[case("groups", "group", "grp")]
#[case("group_memberships", "group_membership", "gm")]
#[case("events", "event", "evt")]
fn table_detection(#[case] table: &str, #[case] entity_type: &str, #[case] prefix: &str) {
    let d = detect_table(table).expect("detect");
    assert_eq!(d.entity_type, entity_type);
    assert_eq!(d.prefix, prefix);
}

#[test]
fn unknown_table_is_reported_by_name() {
    let err = detect_table("pledges").unwrap_err();
    assert_eq!(
        err,
        DetectError::UnknownTable {
            table: "pledges".into()
        }
    );
}

// ---------------------------------------------------------------------------
// Webhook events
// ---------------------------------------------------------------------------

#[rstest]
#[case(AdapterKind::Pco, "people.v2.events.person.created", "person")]
#[case(AdapterKind::Pco, "people.v2.events.person.destroyed", "person")]
#[case(AdapterKind::Pco, "people.v2.events.phone_number.updated", "phone_number")]
#[case(AdapterKind::Pco, "groups.v2.events.membership.created", "group_membership")]
#[case(AdapterKind::Pco, "calendar.v2.events.event.updated", "event")]
#[case(AdapterKind::Ccb, "individual.updated", "person")]
#[case(AdapterKind::Ccb, "group_participant.deleted", "group_membership")]
fn event_detection(#[case] adapter: AdapterKind, #[case] event: &str, #[case] entity_type: &str) {
    let manifest = Manifest::for_kind(adapter);
    let d = detect_event(&manifest, event).expect("detect");
    assert_eq!(d.entity_type, entity_type);
}

#[test]
fn unmatched_event_names_adapter_and_event() {
    let manifest = Manifest::for_kind(AdapterKind::Pco);
    let err = detect_event(&manifest, "giving.v2.events.donation.created").unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("pco"), "{msg}");
    assert!(msg.contains("giving.v2.events.donation.created"), "{msg}");
}

// ---------------------------------------------------------------------------
// Entity types per adapter
// ---------------------------------------------------------------------------

#[rstest]
#[case(AdapterKind::Pco, "household", true)]
#[case(AdapterKind::Pco, "event", true)]
#[case(AdapterKind::Ccb, "household", false)]
#[case(AdapterKind::Ccb, "campus", false)]
#[case(AdapterKind::Ccb, "group_membership", true)]
fn adapter_exposes_entity_type(
    #[case] adapter: AdapterKind,
    #[case] entity_type: &str,
    #[case] exposed: bool,
) {
    let manifest = Manifest::for_kind(adapter);
    let found = descriptor_for(&manifest, &EntityType::from(entity_type));
    assert_eq!(found.is_ok(), exposed);
}
