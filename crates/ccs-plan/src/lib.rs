#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use ccs_corpus::SourceFile;
use serde::{Deserialize, Serialize};

/// Suffix appended to a source file name to locate its expected output.
pub const EXPECTED_SUFFIX: &str = ".expected";

/// One planned execution: a source fixture plus its recorded expectation.
///
/// Case names derive from unique file stems, so no two cases in a plan
/// share a name by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    pub source_path: PathBuf,
    pub expected_path: PathBuf,
}

impl TestCase {
    #[must_use]
    pub fn for_fixture(file: &SourceFile) -> Self {
        let expected_path = file
            .path()
            .with_file_name(format!("{}{EXPECTED_SUFFIX}", file.name()));
        Self {
            name: file.stem().to_owned(),
            source_path: file.path().to_path_buf(),
            expected_path,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlanOrder {
    /// Lexicographic by file name; numeric, given zero-padded stems.
    #[default]
    Sorted,
    /// Sorted, then Fisher-Yates over a SplitMix64 stream. Without an
    /// explicit seed one is drawn from the clock; either way the seed
    /// actually used lands in the plan for reproduction.
    Shuffled { seed: Option<u64> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestPlan {
    pub cases: Vec<TestCase>,
    pub seed: Option<u64>,
}

#[must_use]
pub fn build_plan(admitted: &[SourceFile], order: PlanOrder) -> TestPlan {
    let mut cases = admitted
        .iter()
        .map(TestCase::for_fixture)
        .collect::<Vec<_>>();
    cases.sort_by(|a, b| a.name.cmp(&b.name));

    match order {
        PlanOrder::Sorted => TestPlan { cases, seed: None },
        PlanOrder::Shuffled { seed } => {
            let seed = seed.unwrap_or_else(clock_seed);
            tracing::info!(seed, cases = cases.len(), "shuffling plan");
            let mut rng = SplitMix64::new(seed);
            shuffle(&mut cases, &mut rng);
            TestPlan {
                cases,
                seed: Some(seed),
            }
        }
    }
}

fn shuffle(cases: &mut [TestCase], rng: &mut SplitMix64) {
    for i in (1..cases.len()).rev() {
        let j = rng.next_bounded(i as u64 + 1) as usize;
        cases.swap(i, j);
    }
}

fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos() as u64)
        .unwrap_or(0)
}

struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }

    fn next_bounded(&mut self, n: u64) -> u64 {
        debug_assert!(n > 0);
        if n.is_power_of_two() {
            return self.next_u64() & (n - 1);
        }
        let threshold = n.wrapping_neg() % n;
        loop {
            let r = self.next_u64();
            if r >= threshold {
                return r % n;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use ccs_corpus::discover;
    use tempfile::TempDir;

    use super::{PlanOrder, TestCase, build_plan};

    fn corpus(names: &[&str]) -> (TempDir, Vec<ccs_corpus::SourceFile>) {
        let dir = TempDir::new().expect("tempdir");
        for name in names {
            fs::write(dir.path().join(name), "int main() { return 0; }\n").expect("write");
        }
        let files = discover(dir.path()).expect("discover");
        (dir, files)
    }

    #[test]
    fn case_derives_name_and_expected_path() {
        let (_dir, files) = corpus(&["042.c"]);
        let case = TestCase::for_fixture(&files[0]);
        assert_eq!(case.name, "042");
        assert_eq!(case.source_path, files[0].path());
        assert!(case.expected_path.to_string_lossy().ends_with("042.c.expected"));
    }

    #[test]
    fn sorted_plan_is_deterministic() {
        let (_dir, files) = corpus(&["010.c", "002.c", "007.c"]);
        let first = build_plan(&files, PlanOrder::Sorted);
        let second = build_plan(&files, PlanOrder::Sorted);
        assert_eq!(first, second);
        assert_eq!(
            first.cases.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            ["002", "007", "010"]
        );
        assert_eq!(first.seed, None);
    }

    #[test]
    fn shuffled_plan_preserves_membership() {
        let (_dir, files) = corpus(&["001.c", "002.c", "003.c", "004.c", "005.c"]);
        let plan = build_plan(&files, PlanOrder::Shuffled { seed: Some(9) });

        let mut names = plan
            .cases
            .iter()
            .map(|case| case.name.clone())
            .collect::<Vec<_>>();
        names.sort();
        assert_eq!(names, ["001", "002", "003", "004", "005"]);
    }

    #[test]
    fn same_seed_reproduces_the_same_order() {
        let (_dir, files) = corpus(&["001.c", "002.c", "003.c", "004.c", "005.c", "006.c"]);
        let first = build_plan(&files, PlanOrder::Shuffled { seed: Some(1234) });
        let second = build_plan(&files, PlanOrder::Shuffled { seed: Some(1234) });
        assert_eq!(first.cases, second.cases);
        assert_eq!(first.seed, Some(1234));
    }

    #[test]
    fn unseeded_shuffle_reports_the_seed_it_drew() {
        let (_dir, files) = corpus(&["001.c", "002.c"]);
        let plan = build_plan(&files, PlanOrder::Shuffled { seed: None });
        let seed = plan.seed.expect("effective seed recorded");

        let replay = build_plan(&files, PlanOrder::Shuffled { seed: Some(seed) });
        assert_eq!(plan.cases, replay.cases);
    }

    #[test]
    fn empty_admitted_set_builds_an_empty_plan() {
        let plan = build_plan(&[], PlanOrder::Shuffled { seed: Some(5) });
        assert!(plan.cases.is_empty());
        assert_eq!(plan.seed, Some(5));
    }
}
