use skr_reconcile::*;

fn counts(create: usize, delete: usize) -> DiffCounts {
    DiffCounts {
        create,
        delete,
        ..DiffCounts::default()
    }
}

#[test]
fn scenario_identical_counts_stall_after_limit() {
    let mut t = ProgressTracker::new(4);
    assert!(!t.observe(counts(1, 0), 0));
    assert!(!t.observe(counts(1, 0), 0));
    assert!(!t.observe(counts(1, 0), 0));
    assert!(t.observe(counts(1, 0), 0));
}

#[test]
fn scenario_changing_counts_reset_the_streak() {
    let mut t = ProgressTracker::new(2);
    assert!(!t.observe(counts(2, 0), 0));
    assert!(!t.observe(counts(1, 0), 0));
    assert!(t.observe(counts(1, 0), 0));
}

#[test]
fn scenario_empty_pass_never_stalls() {
    let mut t = ProgressTracker::default();
    for _ in 0..10 {
        assert!(!t.observe(DiffCounts::default(), 0));
    }
    assert_eq!(t.repeats(), 0);
}

#[test]
fn scenario_pass_that_applied_something_is_progress() {
    let mut t = ProgressTracker::new(2);
    assert!(!t.observe(counts(1, 0), 0));
    assert!(!t.observe(counts(1, 0), 1));
    assert_eq!(t.repeats(), 0);
    assert!(!t.observe(counts(1, 0), 0));
    assert!(t.observe(counts(1, 0), 0));
}

#[test]
fn scenario_lagging_child_that_lands_on_the_last_allowed_pass_is_not_a_stall() {
    // Parent created on pass 1; child deferred on passes 1-4, created on 5.
    let mut t = ProgressTracker::new(4);
    assert!(!t.observe(counts(2, 0), 1));
    assert!(!t.observe(counts(1, 0), 0));
    assert!(!t.observe(counts(1, 0), 0));
    assert!(!t.observe(counts(1, 0), 0));
    assert!(!t.observe(counts(1, 0), 1));
    assert!(!t.observe(DiffCounts::default(), 0));
}
