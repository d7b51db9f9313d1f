//! Helpers shared by unit tests.

fn env_u32(name: &str) -> Option<u32> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Property-test case count.
///
/// `PROPTEST_CASES` overrides everything; CI runs `default`; local runs are
/// capped at a handful of cases.
pub fn proptest_cases(default: u32) -> u32 {
    if let Some(value) = env_u32("PROPTEST_CASES") {
        return value.max(1);
    }
    if std::env::var_os("CI").is_some() {
        return default.max(1);
    }
    default.clamp(1, 8)
}
