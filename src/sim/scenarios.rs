//! Built-in scenarios.
//!
//! Each one replays a classic reservation-scheduling situation: overlapping
//! reservations, reverse-order submission, blocking inside a reservation,
//! deadline overruns with and without block credit, overload, and a burst of
//! zero-length jobs.

use super::program::{Instr, Scenario, ThreadProgram};

use Instr::{AwaitDeadline, Busy, Next};

/// Names of all built-in scenarios, in presentation order.
pub const NAMES: &[&str] = &[
    "overlap-one",
    "overlap-two",
    "reverse-order",
    "blocking-single",
    "blocking-two",
    "overrun-timeshare",
    "overrun-recover",
    "overload",
    "zero-exec",
];

pub fn builtin() -> Vec<Scenario> {
    NAMES.iter().filter_map(|n| find(n)).collect()
}

pub fn find(name: &str) -> Option<Scenario> {
    let s = match name {
        "overlap-one" => overlap_one(),
        "overlap-two" => overlap_two(),
        "reverse-order" => reverse_order(),
        "blocking-single" => blocking_single(),
        "blocking-two" => blocking_two(),
        "overrun-timeshare" => overrun_timeshare(),
        "overrun-recover" => overrun_recover(),
        "overload" => overload(),
        "zero-exec" => zero_exec(100),
        _ => return None,
    };
    Some(s)
}

/// Two overlapping reservations of one thread run back to back.
fn overlap_one() -> Scenario {
    Scenario::new(
        "overlap-one",
        "one thread, jobs (1s, +2.5s) and (1s, +3s), each spun to its deadline",
        vec![ThreadProgram::new(
            "task",
            vec![
                Instr::submit(0, 1, 1000, 2500),
                Instr::submit(0, 2, 1000, 3000),
                Next,
                AwaitDeadline,
                Next,
                AwaitDeadline,
            ],
        )],
    )
}

fn overlap_two() -> Scenario {
    Scenario::new(
        "overlap-two",
        "two threads with overlapping reservations (1s, +2.5s) and (1s, +3s)",
        vec![
            ThreadProgram::new(
                "main",
                vec![Instr::submit(1, 1, 1000, 2500), Instr::submit(2, 2, 1000, 3000)],
            ),
            ThreadProgram::new("task1", vec![Next, AwaitDeadline]),
            ThreadProgram::new("task2", vec![Next, AwaitDeadline]),
        ],
    )
}

/// The later-submitted job has the earlier deadline and must run first.
fn reverse_order() -> Scenario {
    Scenario::new(
        "reverse-order",
        "A gets (1s, +3s) first, B gets (1s, +2.5s) second; B runs first",
        vec![
            ThreadProgram::new(
                "main",
                vec![Instr::submit(1, 1, 1000, 3000), Instr::submit(2, 2, 1000, 2500)],
            ),
            ThreadProgram::new("a", vec![Next, Busy { ms: 1000 }, Next]),
            ThreadProgram::new("b", vec![Next, Busy { ms: 1000 }, Next]),
        ],
    )
}

fn blocking_single() -> Scenario {
    Scenario::new(
        "blocking-single",
        "job (1s, +1.2s) works 0.5s, blocks 0.3s, then finishes 0.2s later",
        vec![
            ThreadProgram::new("main", vec![Instr::submit(1, 1, 1000, 1200)]),
            ThreadProgram::new(
                "task1",
                vec![
                    Next,
                    Busy { ms: 500 },
                    Instr::Block { ms: 300 },
                    Instr::snapshot("resumed"),
                    Busy { ms: 200 },
                    Next,
                ],
            ),
        ],
    )
}

/// The blocked thread's core is handed to the next reservation.
fn blocking_two() -> Scenario {
    Scenario::new(
        "blocking-two",
        "task1 (1s, +1.2s) blocks after 0.5s; task2 (1s, +2.3s) takes the core",
        vec![
            ThreadProgram::new(
                "main",
                vec![Instr::submit(1, 1, 1000, 1200), Instr::submit(2, 2, 1000, 2300)],
            ),
            ThreadProgram::new(
                "task1",
                vec![
                    Next,
                    Busy { ms: 500 },
                    Instr::Block { ms: 300 },
                    Busy { ms: 200 },
                    Next,
                ],
            ),
            ThreadProgram::new("task2", vec![Next, Busy { ms: 400 }, Next]),
        ],
    )
}

fn overrun_timeshare() -> Scenario {
    Scenario::new(
        "overrun-timeshare",
        "miss (1s, +1.5s) without block credit, run best-effort into the window of (1s, +3.5s)",
        vec![ThreadProgram::new(
            "task",
            vec![
                Instr::submit(0, 0, 1000, 1500),
                Instr::submit(0, 1, 1000, 3500),
                Next,
                Instr::snapshot("dispatched"),
                AwaitDeadline,
                Instr::snapshot("missed"),
                Busy { ms: 1500 },
                Instr::snapshot("in-window"),
            ],
        )],
    )
}

fn overrun_recover() -> Scenario {
    Scenario::new(
        "overrun-recover",
        "block 1.5s inside (2s, +2.5s), miss it with credit left, reach the window of (2s, +5.5s)",
        vec![ThreadProgram::new(
            "task",
            vec![
                Instr::submit(0, 0, 2000, 2500),
                Instr::submit(0, 1, 2000, 5500),
                Next,
                Instr::snapshot("dispatched"),
                Instr::Block { ms: 1500 },
                AwaitDeadline,
                Instr::snapshot("missed"),
                Busy { ms: 1500 },
                Instr::snapshot("in-window"),
            ],
        )],
    )
}

/// Two full-budget jobs sharing one deadline cannot both fit.
fn overload() -> Scenario {
    Scenario::new(
        "overload",
        "two (1s, +1.5s) jobs on one thread; the first blocks then overruns",
        vec![ThreadProgram::new(
            "task",
            vec![
                Instr::submit(0, 0, 1000, 1500),
                Instr::submit(0, 1, 1000, 1500),
                Next,
                Instr::Block { ms: 500 },
                AwaitDeadline,
                Next,
            ],
        )],
    )
}

/// A consumer fetching `jobs` queued jobs without doing any work.
pub fn zero_exec(jobs: u64) -> Scenario {
    let submits = (0..jobs)
        .map(|i| Instr::submit(1, i, 50, 10_000 + i * 1000))
        .collect();
    let fetches = (0..jobs).map(|_| Next).collect();
    Scenario::new(
        "zero-exec",
        "queue many (50ms, +10s+i) jobs and fetch them back to back",
        vec![
            ThreadProgram::new("producer", submits),
            ThreadProgram::new("consumer", fetches),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_name_resolves_and_checks() {
        assert_eq!(builtin().len(), NAMES.len());
        for s in builtin() {
            s.check().unwrap_or_else(|e| panic!("{}: {e}", s.name));
        }
        assert!(find("nope").is_none());
    }

    #[test]
    fn scenarios_serialize_to_toml() {
        let s = find("blocking-two").unwrap();
        let text = toml::to_string(&s).unwrap();
        let back = Scenario::from_toml_str(&text).unwrap();
        assert_eq!(back.threads[1].code, s.threads[1].code);
    }
}
