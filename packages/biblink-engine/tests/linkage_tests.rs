//! End-to-end linkage scenarios against both store adapters

mod common;

use biblink_engine::{normalize, InputRecord, MatchKey};
use biblink_storage::{FrbrLevel, HeldLink, RecordStatus};
use common::{output_at, Harness};
use pretty_assertions::assert_eq;

// ═══════════════════════════════════════════════════════════════════════════
// Stable ids
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_reprocessed_bib_keeps_manifestation_id() {
    for mut h in Harness::all() {
        let bib = InputRecord::bib(1, "X", "123");
        let first = output_at(&h.service.process(&bib).unwrap(), FrbrLevel::Manifestation);
        for _ in 0..3 {
            let again = h.service.process(&bib).unwrap();
            assert_eq!(output_at(&again, FrbrLevel::Manifestation), first, "{}", h.name);
        }
        h.service.commit().unwrap();

        let mut reopened = h.reopen();
        let after_restart = reopened.process(&bib).unwrap();
        assert_eq!(
            output_at(&after_restart, FrbrLevel::Manifestation),
            first,
            "{}",
            h.name
        );
        assert_eq!(h.repo.successors_of(1).unwrap().len(), 3, "{}", h.name);
    }
}

#[test]
fn test_ids_never_repeat_across_restart() {
    for mut h in Harness::all() {
        let first = h.service.process(&InputRecord::bib(1, "X", "1")).unwrap();
        h.service.commit().unwrap();

        let mut reopened = h.reopen();
        let second = reopened.process(&InputRecord::bib(2, "X", "2")).unwrap();

        for a in &first.outputs {
            assert!(
                second.outputs.iter().all(|b| b.id != a.id),
                "{}: id {} handed out twice",
                h.name,
                a.id
            );
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Reservations and held holdings
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_holdings_share_one_reservation() {
    for mut h in Harness::all() {
        let h1 = h.service.process(&InputRecord::holding(10, "X", ["123"])).unwrap();
        let h2 = h.service.process(&InputRecord::holding(11, "X", ["123"])).unwrap();
        let (h1, h2) = (h1.outputs[0].clone(), h2.outputs[0].clone());

        assert_eq!(h1.status, RecordStatus::Held, "{}", h.name);
        assert_eq!(h2.status, RecordStatus::Held, "{}", h.name);

        let reserved = h.service.identity().lookup_reserved("X", "123").unwrap();
        assert_eq!(
            h.service.held().pending_links(),
            vec![HeldLink::new(h1.id, reserved), HeldLink::new(h2.id, reserved)],
            "{}",
            h.name
        );
        assert_eq!(h.repo.get_linked_to_record_ids(h1.id).unwrap(), vec![reserved]);
    }
}

#[test]
fn test_bib_arrival_resolves_reservation_and_activates_holdings() {
    for mut h in Harness::all() {
        let h1 = h.service.process(&InputRecord::holding(10, "X", ["123"])).unwrap().outputs[0].id;
        let h2 = h.service.process(&InputRecord::holding(11, "X", ["123"])).unwrap().outputs[0].id;
        let reserved = h.service.identity().lookup_reserved("X", "123").unwrap();

        let bib = h.service.process(&InputRecord::bib(1, "X", "123")).unwrap();
        assert_eq!(output_at(&bib, FrbrLevel::Manifestation), reserved, "{}", h.name);
        assert_eq!(bib.activations, vec![h1, h2], "{}", h.name);
        assert_eq!(h.service.identity().lookup_reserved("X", "123"), None);
        assert_eq!(h.service.identity().lookup_processed("X", "123"), Some(reserved));

        // activation lands at the commit
        assert_eq!(h.status_of(h1), RecordStatus::Held, "{}", h.name);
        let report = h.service.commit().unwrap();
        assert_eq!(report.holdings_activated, 2, "{}", h.name);
        assert_eq!(h.status_of(h1), RecordStatus::Active, "{}", h.name);
        assert_eq!(h.status_of(h2), RecordStatus::Active, "{}", h.name);
        assert!(h.held_links_of(&[h1, h2]).is_empty(), "{}", h.name);
    }
}

#[test]
fn test_activation_across_commits() {
    for mut h in Harness::all() {
        let holding = h.service.process(&InputRecord::holding(10, "X", ["123"])).unwrap().outputs[0].id;
        h.service.commit().unwrap();
        let reserved = h.service.identity().lookup_reserved("X", "123").unwrap();
        assert_eq!(
            h.held_links_of(&[holding]),
            vec![HeldLink::new(holding, reserved)],
            "{}",
            h.name
        );

        let mut next_run = h.reopen();
        let bib = next_run.process(&InputRecord::bib(1, "X", "123")).unwrap();
        assert_eq!(bib.activations, vec![holding], "{}", h.name);
        next_run.commit().unwrap();

        assert_eq!(h.status_of(holding), RecordStatus::Active, "{}", h.name);
        assert!(h.held_links_of(&[holding]).is_empty(), "{}", h.name);
    }
}

#[test]
fn test_holding_waits_for_every_referenced_bib() {
    for mut h in Harness::all() {
        let holding = h
            .service
            .process(&InputRecord::holding(10, "X", ["1", "2"]))
            .unwrap()
            .outputs[0]
            .id;

        let first = h.service.process(&InputRecord::bib(1, "X", "1")).unwrap();
        assert!(first.activations.is_empty(), "{}", h.name);
        let second = h.service.process(&InputRecord::bib(2, "X", "2")).unwrap();
        assert_eq!(second.activations, vec![holding], "{}", h.name);
    }
}

#[test]
fn test_reservation_under_system_control_number() {
    for mut h in Harness::all() {
        let holding = h
            .service
            .process(&InputRecord::holding(10, "X", ["(OCoLC)77"]))
            .unwrap()
            .outputs[0]
            .id;
        let reserved = h.service.identity().lookup_reserved("X", "(OCoLC)77").unwrap();

        let bib = InputRecord::bib(1, "X", "ignored")
            .without_control_number()
            .with_system_control_numbers(["(OCoLC)77", "(DLC)5"]);
        let result = h.service.process(&bib).unwrap();

        assert_eq!(output_at(&result, FrbrLevel::Manifestation), reserved, "{}", h.name);
        assert_eq!(result.activations, vec![holding], "{}", h.name);
        assert_eq!(h.service.identity().lookup_processed("X", "(DLC)5"), Some(reserved));
    }
}

#[test]
fn test_holding_of_processed_bib_is_active() {
    for mut h in Harness::all() {
        let bib = h.service.process(&InputRecord::bib(1, "X", "7")).unwrap();
        let manifestation = output_at(&bib, FrbrLevel::Manifestation);

        let holding = h.service.process(&InputRecord::holding(10, "X", ["7"])).unwrap();
        assert_eq!(holding.outputs[0].status, RecordStatus::Active, "{}", h.name);
        assert_eq!(
            h.repo.get_linked_record_ids(manifestation).unwrap(),
            vec![holding.outputs[0].id],
            "{}",
            h.name
        );
        assert!(h.service.held().pending_links().is_empty());
    }
}

#[test]
fn test_reharvested_holding_waits_only_for_new_references() {
    for mut h in Harness::all() {
        let holding = h.service.process(&InputRecord::holding(10, "X", ["3"])).unwrap().outputs[0].id;
        h.service.commit().unwrap();

        let again = h.service.process(&InputRecord::holding(10, "X", ["4"])).unwrap();
        assert_eq!(again.outputs[0].id, holding, "{}", h.name);
        assert_eq!(again.outputs[0].status, RecordStatus::Held, "{}", h.name);
        h.service.commit().unwrap();

        let r4 = h.service.identity().lookup_reserved("X", "4").unwrap();
        assert_eq!(
            h.held_links_of(&[holding]),
            vec![HeldLink::new(holding, r4)],
            "{}",
            h.name
        );

        let mut next_run = h.reopen();
        let dropped = next_run.process(&InputRecord::bib(3, "X", "3")).unwrap();
        assert!(dropped.activations.is_empty(), "{}", h.name);

        let bib = next_run.process(&InputRecord::bib(4, "X", "4")).unwrap();
        assert_eq!(output_at(&bib, FrbrLevel::Manifestation), r4, "{}", h.name);
        assert_eq!(bib.activations, vec![holding], "{}", h.name);
        next_run.commit().unwrap();
        assert_eq!(h.status_of(holding), RecordStatus::Active, "{}", h.name);
        assert!(h.held_links_of(&[holding]).is_empty(), "{}", h.name);
    }
}

#[test]
fn test_org_codes_are_separate_namespaces() {
    for mut h in Harness::all() {
        h.service.process(&InputRecord::bib(1, "X", "7")).unwrap();
        let holding = h.service.process(&InputRecord::holding(10, "Y", ["7"])).unwrap();

        assert_eq!(holding.outputs[0].status, RecordStatus::Held, "{}", h.name);
        assert!(h.service.identity().lookup_reserved("Y", "7").is_some());
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Deletion and orphan fix-up
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_deleted_manifestation_relinks_holding_to_survivor() {
    for mut h in Harness::all() {
        let b1 = h.service.process(&InputRecord::bib(1, "X", "1")).unwrap();
        let b2 = h.service.process(&InputRecord::bib(2, "X", "2")).unwrap();
        let (m1, m2) = (
            output_at(&b1, FrbrLevel::Manifestation),
            output_at(&b2, FrbrLevel::Manifestation),
        );
        let h3 = h
            .service
            .process(&InputRecord::holding(10, "X", ["1", "2"]))
            .unwrap()
            .outputs[0]
            .id;

        let deleted = h.service.process(&InputRecord::deleted(2)).unwrap();
        assert!(deleted.outputs.iter().any(|r| r.id == m2 && r.is_deleted()));

        assert_eq!(h.status_of(h3), RecordStatus::Active, "{}", h.name);
        assert_eq!(h.repo.get_linked_to_record_ids(h3).unwrap(), vec![m1], "{}", h.name);
        assert!(h.repo.get_linked_record_ids(m2).unwrap().is_empty(), "{}", h.name);
        assert_eq!(h.service.identity().lookup_processed("X", "2"), None);
    }
}

#[test]
fn test_deleted_manifestation_demotes_holding_without_survivor() {
    for mut h in Harness::all() {
        let bib = h.service.process(&InputRecord::bib(1, "X", "1")).unwrap();
        let m = output_at(&bib, FrbrLevel::Manifestation);
        let holding = h.service.process(&InputRecord::holding(10, "X", ["1"])).unwrap().outputs[0].id;

        h.service.process(&InputRecord::deleted(1)).unwrap();

        let reserved = h.service.identity().lookup_reserved("X", "1").unwrap();
        assert_ne!(reserved, m, "{}", h.name);
        assert_eq!(h.status_of(holding), RecordStatus::Held, "{}", h.name);
        assert_eq!(h.repo.get_linked_to_record_ids(holding).unwrap(), vec![reserved]);

        // the bib comes back: same reservation, holding released
        let back = h.service.process(&InputRecord::bib(1, "X", "1")).unwrap();
        assert_eq!(output_at(&back, FrbrLevel::Manifestation), reserved, "{}", h.name);
        assert_eq!(back.activations, vec![holding], "{}", h.name);
        h.service.commit().unwrap();
        assert_eq!(h.status_of(holding), RecordStatus::Active, "{}", h.name);
    }
}

#[test]
fn test_deleted_manifestation_keeps_holding_held_on_open_reservation() {
    for mut h in Harness::all() {
        let b1 = h.service.process(&InputRecord::bib(1, "X", "1")).unwrap();
        let b2 = h.service.process(&InputRecord::bib(2, "X", "2")).unwrap();
        let (m1, m2) = (
            output_at(&b1, FrbrLevel::Manifestation),
            output_at(&b2, FrbrLevel::Manifestation),
        );
        let holding = h
            .service
            .process(&InputRecord::holding(10, "X", ["1", "2", "3"]))
            .unwrap()
            .outputs[0]
            .id;
        let r3 = h.service.identity().lookup_reserved("X", "3").unwrap();
        assert_eq!(h.status_of(holding), RecordStatus::Held, "{}", h.name);
        h.service.commit().unwrap();

        h.service.process(&InputRecord::deleted(1)).unwrap();

        let mut expected = vec![m2, r3];
        expected.sort();
        assert_eq!(h.status_of(holding), RecordStatus::Held, "{}", h.name);
        assert_eq!(h.repo.get_linked_to_record_ids(holding).unwrap(), expected, "{}", h.name);
        assert!(h.repo.get_linked_record_ids(m1).unwrap().is_empty(), "{}", h.name);
        assert_eq!(h.service.identity().lookup_reserved("X", "1"), None, "{}", h.name);

        let b3 = h.service.process(&InputRecord::bib(3, "X", "3")).unwrap();
        assert_eq!(output_at(&b3, FrbrLevel::Manifestation), r3, "{}", h.name);
        assert_eq!(b3.activations, vec![holding], "{}", h.name);
        h.service.commit().unwrap();

        assert_eq!(h.status_of(holding), RecordStatus::Active, "{}", h.name);
        assert_eq!(h.repo.get_linked_to_record_ids(holding).unwrap(), expected, "{}", h.name);
        assert!(h.held_links_of(&[holding]).is_empty(), "{}", h.name);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Bib updates
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_replaced_control_number_is_free_for_another_bib() {
    for mut h in Harness::all() {
        let first = h.service.process(&InputRecord::bib(1, "X", "1")).unwrap();
        let m1 = output_at(&first, FrbrLevel::Manifestation);

        let updated = h.service.process(&InputRecord::bib(1, "X", "5")).unwrap();
        assert_eq!(output_at(&updated, FrbrLevel::Manifestation), m1, "{}", h.name);

        let other = h.service.process(&InputRecord::bib(2, "X", "1")).unwrap();
        let m2 = output_at(&other, FrbrLevel::Manifestation);
        assert_ne!(m2, m1, "{}", h.name);
        assert_eq!(h.service.identity().lookup_processed("X", "1"), Some(m2), "{}", h.name);
        assert_eq!(h.service.identity().lookup_processed("X", "5"), Some(m1), "{}", h.name);

        let holding = h.service.process(&InputRecord::holding(10, "X", ["1"])).unwrap();
        assert_eq!(holding.outputs[0].status, RecordStatus::Active, "{}", h.name);
        assert_eq!(
            h.repo.get_linked_to_record_ids(holding.outputs[0].id).unwrap(),
            vec![m2],
            "{}",
            h.name
        );

        h.service.commit().unwrap();
        let reopened = h.reopen();
        assert_eq!(reopened.identity().lookup_processed("X", "1"), Some(m2), "{}", h.name);
        assert_eq!(reopened.identity().lookup_processed("X", "5"), Some(m1), "{}", h.name);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Match points
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_match_key_determinism() {
    let key = normalize("m  61000295 /M/r86");
    assert!(matches!(key, MatchKey::Numeric(_)));
    for _ in 0..10 {
        assert_eq!(normalize("m  61000295 /M/r86"), key);
    }
    assert_eq!(normalize(""), MatchKey::Invalid);
    assert_eq!(normalize("///"), MatchKey::Invalid);
    assert_eq!(normalize("nuc76039265"), MatchKey::Numeric(76039265));
    // only ASCII digits count
    assert_eq!(normalize("\u{0661}\u{0662}\u{0663}\u{0664}"), MatchKey::Invalid);
}

#[test]
fn test_duplicate_candidates_survive_commit() {
    for mut h in Harness::all() {
        h.service
            .process(&InputRecord::bib(1, "X", "1").with_lccn("sn 85000001"))
            .unwrap();
        h.service.commit().unwrap();

        let mut reopened = h.reopen();
        let second = reopened
            .process(&InputRecord::bib(2, "X", "2").with_lccn("85000001"))
            .unwrap();
        assert_eq!(second.messages.len(), 1, "{}", h.name);
        assert!(second.messages[0].detail.contains("[1]"), "{}", h.name);

        // deleting the first bib drops its key
        reopened.process(&InputRecord::deleted(1)).unwrap();
        let third = reopened
            .process(&InputRecord::bib(3, "X", "3").with_lccn("85000001"))
            .unwrap();
        assert!(third.messages[0].detail.contains("[2]"), "{}", h.name);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Delta reconciliation
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_commit_clears_deltas_and_reload_matches_memory() {
    for mut h in Harness::all() {
        h.service.process(&InputRecord::holding(10, "X", ["123"])).unwrap();
        h.service.process(&InputRecord::bib(1, "X", "9")).unwrap();
        h.service.process(&InputRecord::holding(11, "X", ["abc"])).unwrap();
        h.service.process(&InputRecord::bib(2, "X", "abc")).unwrap();

        let before = h.service.identity().view();
        h.service.commit().unwrap();

        assert!(!h.service.identity().has_pending_delta(), "{}", h.name);
        assert!(!h.service.matchpoints().has_pending_delta(), "{}", h.name);
        assert!(!h.service.held().has_pending(), "{}", h.name);
        assert_eq!(h.reopen().identity().view(), before, "{}", h.name);
        assert_eq!(before.reserved.len(), 1, "{}", h.name);
        assert_eq!(before.processed.len(), 2, "{}", h.name);
    }
}

#[test]
fn test_counters_persist_new_inputs_only() {
    for mut h in Harness::all() {
        h.service.process(&InputRecord::bib(1, "X", "1")).unwrap();
        h.service.process(&InputRecord::bib(1, "X", "1")).unwrap();
        h.service.process(&InputRecord::holding(10, "X", ["1"])).unwrap();
        h.service.commit().unwrap();

        assert_eq!(h.property("input_bibs").as_deref(), Some("1"), "{}", h.name);
        assert_eq!(h.property("input_holdings").as_deref(), Some("1"), "{}", h.name);
        assert_eq!(h.reopen().counters().input_bibs, 1, "{}", h.name);
    }
}
