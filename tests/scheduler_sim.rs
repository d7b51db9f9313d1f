//! Scenario-level scheduling properties checked through the deterministic
//! simulator.

use std::path::Path;
use std::time::Duration;

use proptest::prelude::*;

use atlas_sched::sim::{scenarios, simulate, Instr, Scenario, SimOutcome, ThreadProgram};
use atlas_sched::{ExecutionClass, JobId, SchedulerConfig};

fn run(name: &str) -> SimOutcome {
    let scenario = scenarios::find(name).expect("builtin scenario");
    simulate(scenario, &SchedulerConfig::default()).expect("simulation")
}

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

/// Property-test case count: `PROPTEST_CASES` overrides, CI runs `default`,
/// local runs stay small.
fn proptest_cases(default: u32) -> u32 {
    if let Some(value) = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
    {
        return value.max(1);
    }
    if std::env::var_os("CI").is_some() {
        return default.max(1);
    }
    default.clamp(1, 8)
}

#[test]
fn overlap_one_runs_jobs_back_to_back() {
    let out = run("overlap-one");
    let task = out.thread("task").unwrap();
    assert_eq!(task.jobs, vec![JobId(1), JobId(2)]);
    assert_eq!(
        out.dispatches(),
        vec![(task.tid, JobId(1)), (task.tid, JobId(2))]
    );
    // Each job is spun to its deadline, so both overrun.
    assert_eq!(out.stats.missed, 2);
    assert_eq!(task.cpu_us, 3_000_000);
    assert_eq!(out.elapsed_us, 3_000_000);
}

#[test]
fn overlap_two_serializes_threads() {
    let out = run("overlap-two");
    let t1 = out.thread("task1").unwrap();
    let t2 = out.thread("task2").unwrap();
    assert_eq!(out.dispatches(), vec![(t1.tid, JobId(1)), (t2.tid, JobId(2))]);
    assert_eq!(t1.cpu_us, 2_500_000);
    assert_eq!(t2.cpu_us, 500_000);
}

#[test]
fn reverse_order_submission_runs_earlier_deadline_first() {
    let out = run("reverse-order");
    let a = out.thread("a").unwrap().tid;
    let b = out.thread("b").unwrap().tid;
    assert_eq!(out.dispatches(), vec![(b, JobId(2)), (a, JobId(1))]);
    assert_eq!(
        out.completions(),
        vec![(b, JobId(2), ms(1000)), (a, JobId(1), ms(1000))]
    );
    assert_eq!(out.stats.missed, 0);
}

#[test]
fn blocking_single_credits_remainder() {
    let out = run("blocking-single");
    let snap = out.snapshot("resumed").unwrap();
    assert_eq!(snap.class, ExecutionClass::Recover);
    assert_eq!(snap.block_credit_us, 500_000);
    assert_eq!(snap.consumed_us, 500_000);
    // Back from the block but not yet dispatched again.
    assert_eq!(snap.blocked_us, 300_000);
    assert_eq!(snap.current_job, None);
    assert_eq!(snap.blocked_job, Some(JobId(1)));

    let done = out.completions();
    assert_eq!(done.len(), 1);
    let consumed = done[0].2;
    assert!(consumed >= ms(500) && consumed <= ms(1000), "{consumed:?}");
    assert_eq!(out.thread("task1").unwrap().cpu_us, 700_000);
}

#[test]
fn blocking_two_hands_core_to_next_reservation() {
    let out = run("blocking-two");
    let t1 = out.thread("task1").unwrap().tid;
    let t2 = out.thread("task2").unwrap().tid;

    assert_eq!(
        out.dispatches(),
        vec![(t1, JobId(1)), (t2, JobId(2)), (t1, JobId(1))]
    );
    assert_eq!(
        out.completions(),
        vec![(t2, JobId(2), ms(400)), (t1, JobId(1), ms(700))]
    );
    assert_eq!(out.stats.blocks, 1);
    assert_eq!(out.stats.missed, 0);
    assert_eq!(out.elapsed_us, 1_100_000);
}

#[test]
fn overrun_without_credit_goes_timeshare_until_window() {
    let out = run("overrun-timeshare");
    assert_eq!(out.snapshot("dispatched").unwrap().class, ExecutionClass::Atlas);
    assert_eq!(out.snapshot("missed").unwrap().class, ExecutionClass::Timeshare);
    assert_eq!(out.snapshot("in-window").unwrap().class, ExecutionClass::Atlas);

    let tid = out.thread("task").unwrap().tid;
    let changes = out.class_changes(tid);
    assert!(changes.contains(&(1_500_000, ExecutionClass::Timeshare)));
    // Window of the second job: 3.5s deadline minus 1s budget.
    assert!(changes.contains(&(2_500_000, ExecutionClass::Atlas)));
}

#[test]
fn overrun_with_credit_goes_recover_until_window() {
    let out = run("overrun-recover");
    assert_eq!(out.snapshot("dispatched").unwrap().class, ExecutionClass::Atlas);

    let missed = out.snapshot("missed").unwrap();
    assert_eq!(missed.class, ExecutionClass::Recover);
    assert_eq!(missed.block_credit_us, 1_000_000);

    assert_eq!(out.snapshot("in-window").unwrap().class, ExecutionClass::Atlas);
    let tid = out.thread("task").unwrap().tid;
    assert!(out
        .class_changes(tid)
        .contains(&(3_500_000, ExecutionClass::Atlas)));
}

#[test]
fn overload_drops_the_job_that_cannot_fit() {
    let out = run("overload");
    assert_eq!(out.stats.missed, 1);
    assert_eq!(out.stats.expired, 1);
    assert_eq!(out.thread("task").unwrap().jobs, vec![JobId(0)]);
    assert_eq!(out.elapsed_us, 1_500_000);
}

#[test]
fn zero_exec_fetches_every_job_in_deadline_order() {
    let out = run("zero-exec");
    let consumer = out.thread("consumer").unwrap();
    let expected: Vec<JobId> = (0..100).map(JobId).collect();
    assert_eq!(consumer.jobs, expected);
    assert_eq!(out.stats.completed, 99);
    // The last job is still held when the consumer exits.
    assert_eq!(out.stats.cancelled, 1);
    assert_eq!(out.elapsed_us, 0);
}

#[test]
fn scenario_file_matches_builtin() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("scenarios/blocking-two.toml");
    let scenario = Scenario::load(&path).expect("scenario file");
    let from_file = simulate(scenario, &SchedulerConfig::default()).unwrap();
    let builtin = run("blocking-two");
    assert_eq!(from_file.dispatches(), builtin.dispatches());
    assert_eq!(from_file.completions(), builtin.completions());
}

#[test]
fn small_trace_capacity_keeps_latest_events() {
    let cfg = SchedulerConfig {
        trace_capacity: 8,
        ..SchedulerConfig::default()
    };
    let out = simulate(scenarios::zero_exec(20), &cfg).unwrap();
    assert_eq!(out.trace.len(), 8);
    assert_eq!(out.stats.submitted, 20);
}

fn single_thread(deadlines: &[u64]) -> Scenario {
    let mut code: Vec<Instr> = deadlines
        .iter()
        .enumerate()
        .map(|(i, &d)| Instr::submit(0, i as u64, 10, d))
        .collect();
    for _ in deadlines {
        code.push(Instr::Next);
        code.push(Instr::Busy { ms: 5 });
    }
    code.push(Instr::Next);
    Scenario::new("single", "", vec![ThreadProgram::new("t", code)])
}

fn mixed(jobs: &[(usize, u64, u64, u64)]) -> Scenario {
    // (worker, budget_ms, deadline_ms, work_ms)
    let mut main = Vec::new();
    let mut workers: Vec<Vec<Instr>> = vec![Vec::new(); 3];
    for (i, &(w, budget, deadline, work)) in jobs.iter().enumerate() {
        main.push(Instr::submit(w + 1, i as u64, budget, deadline));
        workers[w].push(Instr::Next);
        workers[w].push(Instr::Busy { ms: work });
    }
    let mut threads = vec![ThreadProgram::new("main", main)];
    for (i, mut code) in workers.into_iter().enumerate() {
        code.push(Instr::Next);
        threads.push(ThreadProgram::new(&format!("w{i}"), code));
    }
    Scenario::new("mixed", "", threads)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(proptest_cases(32)))]

    /// One thread's jobs complete in deadline order, each finishing before the
    /// next is dispatched.
    #[test]
    fn single_thread_completes_in_deadline_order(
        deadlines in proptest::collection::vec(200u64..2000, 1..12)
    ) {
        let out = simulate(single_thread(&deadlines), &SchedulerConfig::default()).unwrap();

        let done: Vec<usize> = out.completions().iter().map(|c| c.1 .0 as usize).collect();
        let mut model: Vec<usize> = (0..deadlines.len()).collect();
        model.sort_by_key(|&i| (deadlines[i], i));
        prop_assert_eq!(&done, &model);

        let dispatched: Vec<usize> = out.dispatches().iter().map(|d| d.1 .0 as usize).collect();
        prop_assert_eq!(dispatched, done);
        prop_assert_eq!(out.stats.missed, 0);
    }

    /// Arbitrary mixes of budgets, deadlines and work never break the core
    /// invariants and account for every submitted job.
    #[test]
    fn mixed_workloads_conserve_jobs(
        jobs in proptest::collection::vec((0usize..3, 5u64..40, 20u64..400, 1u64..30), 1..16)
    ) {
        let out = simulate(mixed(&jobs), &SchedulerConfig::default()).unwrap();
        let s = out.stats;
        prop_assert_eq!(s.submitted, jobs.len() as u64);
        prop_assert_eq!(s.completed + s.missed + s.expired + s.cancelled, s.submitted);
    }
}
