use super::*;
use crate::config::LimitConfig;

const NOW: f64 = 1_700_000_000.0;

fn limits(f: impl FnOnce(&mut LimitConfig)) -> LimitConfig {
    let mut cfg = LimitConfig::default();
    f(&mut cfg);
    cfg
}

fn ledger_with(group: LimitConfig, site: LimitConfig) -> AdmissionLedger {
    let mut ledger = AdmissionLedger::new();
    ledger.group_init("books", &group);
    ledger.site_init("example.org", &site);
    ledger
}

#[test]
fn running_total_matches_proxy_buckets() {
    let key = CounterKey::new(EntityKind::Site, "example.org", Scope::Global);
    let mut c = LimitCounter::new(key, Limits::default());
    let proxies = ["", "socks5://a", "socks5://b", "", "socks5://a"];
    for p in proxies {
        c.add_run(p, NOW);
    }
    let sum: u32 = ["", "socks5://a", "socks5://b"]
        .iter()
        .map(|p| c.running_for(p))
        .sum();
    assert_eq!(c.running(), 5);
    assert_eq!(sum, c.running());

    c.remove_run("socks5://a", NOW);
    c.remove_run("", NOW);
    assert_eq!(c.running(), 3);
    assert_eq!(c.running_for("socks5://a"), 1);
    assert_eq!(c.running_for(""), 1);
    assert_eq!(c.running_for("socks5://b"), 1);

    for p in ["", "socks5://a", "socks5://b"] {
        c.remove_run(p, NOW);
    }
    assert_eq!(c.running(), 0);
    assert!(c.snapshot().running_by_proxy.is_empty());
}

#[test]
#[cfg(debug_assertions)]
#[should_panic(expected = "remove_run without matching add_run")]
fn unmatched_remove_run_asserts_in_debug() {
    let key = CounterKey::new(EntityKind::Group, "books", Scope::Global);
    let mut c = LimitCounter::new(key, Limits::default());
    c.remove_run("", NOW);
}

#[test]
fn waiting_floors_at_zero() {
    let key = CounterKey::new(EntityKind::Group, "books", Scope::Global);
    let mut c = LimitCounter::new(key, Limits::default());
    c.remove_waiting();
    assert_eq!(c.waiting(), 0);
    c.add_waiting();
    c.remove_waiting();
    c.remove_waiting();
    assert_eq!(c.waiting(), 0);
}

#[test]
fn can_add_respects_scoped_and_global_ceilings() {
    let mut ledger = ledger_with(
        limits(|l| {
            l.max_waiting = 3;
            l.waiting_per_user = 2;
        }),
        LimitConfig::default(),
    );
    assert!(ledger.group_can_add("books"));
    assert!(ledger.user_can_add(1, "example.org", "books"));

    ledger.add_waiting(1, "example.org", "books");
    ledger.add_waiting(1, "example.org", "books");
    assert!(ledger.group_can_add("books"));
    assert!(!ledger.user_can_add(1, "example.org", "books"));
    assert!(ledger.user_can_add(2, "example.org", "books"));

    ledger.add_waiting(2, "example.org", "books");
    assert!(!ledger.group_can_add("books"));
    assert!(ledger.site_can_add("example.org"));

    ledger.remove_waiting(1, "example.org", "books");
    assert!(ledger.group_can_add("books"));
    assert!(ledger.user_can_add(1, "example.org", "books"));
}

#[test]
fn unregistered_entities_fail_open_for_start_and_closed_for_add() {
    let ledger = AdmissionLedger::new();
    assert!(!ledger.group_can_add("ghost"));
    assert!(!ledger.site_can_add("ghost.org"));
    assert!(!ledger.user_can_add(1, "ghost.org", "ghost"));
    assert!(ledger.group_can_start("ghost", "", NOW));
    assert!(ledger.site_can_start("ghost.org", "", NOW));
    assert!(ledger.user_can_start(1, "ghost.org", "ghost", "", NOW));
    assert!(ledger.group_has_capacity("ghost"));
}

#[test]
fn max_one_time_caps_running_across_proxies() {
    let mut ledger = ledger_with(limits(|l| l.max_one_time = 2), LimitConfig::default());
    ledger.add_run(1, "example.org", "books", "", NOW);
    assert!(ledger.group_can_start("books", "socks5://a", NOW));
    ledger.add_run(2, "example.org", "books", "socks5://a", NOW);
    assert!(!ledger.group_has_capacity("books"));
    assert!(!ledger.group_can_start("books", "socks5://b", NOW));

    ledger.remove_run(1, "example.org", "books", "", NOW + 1.0);
    assert!(ledger.group_has_capacity("books"));
    assert!(ledger.group_can_start("books", "socks5://b", NOW + 1.0));
}

#[test]
fn one_time_applies_per_proxy_bucket() {
    let mut ledger = ledger_with(LimitConfig::default(), limits(|l| l.one_time = 1));
    ledger.add_run(1, "example.org", "books", "socks5://a", NOW);
    assert!(!ledger.site_can_start("example.org", "socks5://a", NOW));
    assert!(ledger.site_can_start("example.org", "socks5://b", NOW));
    assert!(ledger.site_can_start("example.org", "", NOW));
}

#[test]
fn delay_spaces_launches_per_proxy() {
    let mut ledger = ledger_with(LimitConfig::default(), limits(|l| l.delay = 10));
    assert!(ledger.site_can_start("example.org", "", NOW));
    ledger.add_run(1, "example.org", "books", "", NOW);
    assert!(!ledger.site_can_start("example.org", "", NOW + 5.0));
    assert!(!ledger.site_can_start("example.org", "", NOW + 10.0));
    assert!(ledger.site_can_start("example.org", "", NOW + 10.5));
    assert!(ledger.site_can_start("example.org", "socks5://other", NOW + 1.0));

    // finishing restamps the mark
    ledger.remove_run(1, "example.org", "books", "", NOW + 20.0);
    assert!(!ledger.site_can_start("example.org", "", NOW + 25.0));
    assert!(ledger.site_can_start("example.org", "", NOW + 31.0));
}

#[test]
fn per_user_limit_blocks_second_task_until_first_finishes() {
    let mut ledger = ledger_with(limits(|l| l.one_time_per_user = 1), LimitConfig::default());
    ledger.add_waiting(7, "example.org", "books");
    ledger.add_waiting(7, "example.org", "books");

    assert!(ledger.user_can_start(7, "example.org", "books", "", NOW));
    ledger.remove_waiting(7, "example.org", "books");
    ledger.add_run(7, "example.org", "books", "", NOW);

    assert!(!ledger.user_can_start(7, "example.org", "books", "", NOW));
    assert!(ledger.user_can_start(8, "example.org", "books", "", NOW));
    assert!(ledger.group_can_start("books", "", NOW));

    ledger.remove_run(7, "example.org", "books", "", NOW + 1.0);
    assert!(ledger.user_can_start(7, "example.org", "books", "", NOW + 1.0));
}

#[test]
fn restart_keeps_delay_window_through_snapshot() {
    let site = limits(|l| l.delay = 30);
    let mut before = ledger_with(LimitConfig::default(), site.clone());
    before.add_run(1, "example.org", "books", "", NOW - 1.0);
    let persisted = before.collect_marks();

    let mut snapshot = RateSnapshot::new();
    for (key, marks) in persisted {
        snapshot.insert(&key, marks);
    }

    let mut after = AdmissionLedger::new();
    after.restore(snapshot);
    after.group_init("books", &LimitConfig::default());
    after.site_init("example.org", &site);
    assert!(!after.site_can_start("example.org", "", NOW));
    assert!(after.site_can_start("example.org", "", NOW + 30.0));
}

#[test]
fn restored_user_marks_apply_to_lazily_created_counters() {
    let group = limits(|l| l.delay_per_user = 60);
    let mut snapshot = RateSnapshot::new();
    let key = CounterKey::new(EntityKind::Group, "books", Scope::PerUser(9));
    let mut marks = RateMarks::new();
    marks.insert(String::new(), NOW - 5.0);
    snapshot.insert(&key.to_string_key(), marks);

    let mut ledger = AdmissionLedger::new();
    ledger.restore(snapshot);
    ledger.group_init("books", &group);
    ledger.site_init("example.org", &LimitConfig::default());

    assert!(!ledger.user_can_start(9, "example.org", "books", "", NOW));
    assert!(ledger.user_can_start(10, "example.org", "books", "", NOW));
}

#[test]
fn flush_evicts_only_idle_users() {
    let mut ledger = ledger_with(limits(|l| l.delay_per_user = 10), LimitConfig::default());
    ledger.add_waiting(1, "example.org", "books");
    ledger.add_run(2, "example.org", "books", "", NOW);
    ledger.remove_run(2, "example.org", "books", "", NOW);
    ledger.add_run(3, "example.org", "books", "", NOW);
    ledger.remove_run(3, "example.org", "books", "", NOW - 100.0);
    assert_eq!(ledger.user_count(), 3);

    // user 1 is waiting, user 2 is inside its delay window, user 3 is idle
    let out = ledger.flush(NOW + 1.0);
    assert_eq!(out.evicted, vec![3]);
    assert_eq!(ledger.user_count(), 2);
    assert!(out
        .marks
        .iter()
        .any(|(k, _)| k == "group_books_global"));
    assert!(!out.marks.iter().any(|(k, _)| k.ends_with("_3")));

    let out = ledger.flush(NOW + 20.0);
    assert_eq!(out.evicted, vec![2]);
    assert_eq!(ledger.user_count(), 1);
}

#[test]
fn destroy_refused_while_busy() {
    let mut ledger = ledger_with(LimitConfig::default(), LimitConfig::default());
    ledger.add_waiting(1, "example.org", "books");
    assert!(!ledger.group_destroy("books"));
    assert!(!ledger.site_destroy("example.org"));

    ledger.remove_waiting(1, "example.org", "books");
    assert!(ledger.group_destroy("books"));
    assert!(!ledger.group_can_add("books"));
    assert!(ledger.user_counter(1, EntityKind::Group, "books").is_none());
}

#[test]
fn retired_group_refuses_new_work_while_draining() {
    let mut ledger = ledger_with(LimitConfig::default(), LimitConfig::default());
    ledger.add_run(1, "example.org", "books", "", NOW);
    assert!(!ledger.group_retire("books"));
    assert!(ledger.group_is_retired("books"));
    assert!(!ledger.group_can_add("books"));
    assert!(ledger.group_can_start("books", "", NOW));

    ledger.remove_run(1, "example.org", "books", "", NOW);
    assert!(ledger.group_retire("books"));
    assert!(!ledger.group_is_retired("books"));
    assert!(ledger.groups().is_empty());

    ledger.group_init("books", &LimitConfig::default());
    ledger.add_waiting(1, "example.org", "books");
    assert!(!ledger.site_retire("example.org"));
    assert!(!ledger.site_can_add("example.org"));
    assert!(!ledger.group_retire("books"));

    // Coming back into the config clears the retirement.
    ledger.group_init("books", &LimitConfig::default());
    ledger.site_init("example.org", &LimitConfig::default());
    assert!(ledger.group_can_add("books"));
    assert!(ledger.site_can_add("example.org"));
}

#[test]
fn init_refreshes_limits_without_losing_counts() {
    let mut ledger = ledger_with(limits(|l| l.max_one_time = 1), LimitConfig::default());
    ledger.add_run(1, "example.org", "books", "", NOW);
    assert!(!ledger.group_has_capacity("books"));

    ledger.group_init("books", &limits(|l| l.max_one_time = 3));
    let c = ledger.counter(EntityKind::Group, "books").unwrap();
    assert_eq!(c.running(), 1);
    assert_eq!(c.limits().max_one_time, 3);
    assert!(ledger.group_has_capacity("books"));
}

#[test]
fn dirty_marks_are_taken_once() {
    let mut ledger = ledger_with(LimitConfig::default(), LimitConfig::default());
    ledger.add_run(4, "example.org", "books", "socks5://a", NOW);
    let mut keys: Vec<String> = ledger
        .take_dirty_marks()
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    keys.sort();
    assert_eq!(
        keys,
        vec![
            "group_books_4",
            "group_books_global",
            "site_example.org_4",
            "site_example.org_global"
        ]
    );
    assert!(ledger.take_dirty_marks().is_empty());
}

#[test]
fn export_lists_global_and_user_counters() {
    let mut ledger = ledger_with(LimitConfig::default(), LimitConfig::default());
    ledger.add_waiting(5, "example.org", "books");
    let snap = ledger.export();
    assert_eq!(snap.global.groups["books"].waiting, 1);
    assert_eq!(snap.global.sites["example.org"].waiting, 1);
    assert_eq!(snap.users[&5].groups["books"].waiting, 1);
}
