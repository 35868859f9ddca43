use std::path::PathBuf;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rstest::*;

use fishhook_core::models::{Region, RegionSet};
use fishhook_scoring::{
    Covariate, CovariateList, DispersionMode, ExecutionContext, FishHook, FishHookConfig,
    FishHookError, HypothesisSet, RowStatus,
};

fn get_test_path(file_name: &str) -> PathBuf {
    std::env::current_dir()
        .unwrap()
        .join("../tests/data")
        .join(file_name)
}

fn read_bed(file_name: &str) -> RegionSet {
    RegionSet::try_from(get_test_path(file_name).as_path()).unwrap()
}

fn assert_close(a: f64, b: f64) {
    assert!((a - b).abs() < 1e-9, "{a} != {b}");
}

#[fixture]
fn exec() -> ExecutionContext {
    ExecutionContext::single_threaded()
}

#[fixture]
fn fish() -> FishHook {
    FishHook::new(
        read_bed("hypotheses.bed"),
        read_bed("events.bed"),
        read_bed("eligible.bed"),
        FishHookConfig::default().with_dedup_key("sample"),
    )
    .unwrap()
}

#[fixture]
fn covariates() -> CovariateList {
    let rt = read_bed("covariates/replication_timing.bed");
    let het = read_bed("covariates/heterochromatin.bed");

    let mut list = Covariate::numeric_fields(&rt, &["rt", "expr"]).unwrap();
    list.push(Covariate::interval("het", &het).unwrap()).unwrap();
    list
}

///
/// Hypotheses of 1kb spaced 10kb apart, a background of `i % 3` events each
/// and two hotspots of 40 events. Covariates: `rt` cycles with the index,
/// `noise` is uniform random.
///
fn synthetic(seed: u64) -> (RegionSet, RegionSet, RegionSet, RegionSet) {
    let mut rng = StdRng::seed_from_u64(seed);
    let n = 100u32;
    let hotspots = [10u32, 37];

    let mut hypotheses = Vec::new();
    let mut events = Vec::new();
    let mut track = Vec::new();
    for i in 0..n {
        let start = i * 10_000;
        hypotheses.push(
            Region::new("chr1", start, start + 1000)
                .unwrap()
                .with_meta("name", format!("g{i}")),
        );
        let count = if hotspots.contains(&i) { 40 } else { i % 3 };
        for k in 0..count {
            events.push(
                Region::point("chr1", start + 10 + 7 * k)
                    .unwrap()
                    .with_meta("sample", format!("s{k}")),
            );
        }
        track.push(
            Region::new("chr1", start, start + 1000)
                .unwrap()
                .with_meta("rt", format!("{}", i % 5))
                .with_meta("noise", format!("{}", rng.random::<f64>())),
        );
    }

    let eligible = RegionSet::from(vec![Region::new("chr1", 0, n * 10_000).unwrap()]);
    (
        RegionSet::from(hypotheses),
        RegionSet::from(events),
        eligible,
        RegionSet::from(track),
    )
}

fn synthetic_fish(config: FishHookConfig) -> FishHook {
    let (hypotheses, events, eligible, track) = synthetic(42);
    let covariates = Covariate::numeric_fields(&track, &["rt", "noise"]).unwrap();
    FishHook::new(hypotheses, events, eligible, config)
        .unwrap()
        .with_covariates(&covariates)
        .unwrap()
}

#[rstest]
fn test_counts_and_eligible_territory(mut fish: FishHook, exec: ExecutionContext) {
    let table = fish.annotate(&exec).unwrap();

    // sampleX hits geneA twice but counts once; sampleZ is outside the
    // eligible part of geneA
    assert_eq!(*table.observed, vec![1, 1, 0]);
    assert_eq!(*table.eligible_bases, vec![500, 1000, 300]);
}

#[rstest]
fn test_without_dedup_every_event_counts(exec: ExecutionContext) {
    let mut fish = FishHook::new(
        read_bed("hypotheses.bed"),
        read_bed("events.bed"),
        read_bed("eligible.bed"),
        FishHookConfig::default(),
    )
    .unwrap();
    let table = fish.annotate(&exec).unwrap();
    assert_eq!(*table.observed, vec![2, 1, 0]);
}

#[rstest]
fn test_covariate_annotation(fish: FishHook, covariates: CovariateList, exec: ExecutionContext) {
    let mut fish = fish.with_covariates(&covariates).unwrap();
    let table = fish.annotate(&exec).unwrap();

    assert_eq!(table.covariate_names, vec!["rt", "expr", "het"]);
    let rt = table.column("rt").unwrap();
    assert_close(rt[0], 0.5);
    assert_close(rt[1], 0.5);
    assert_close(rt[2], 0.1);

    let expr = table.column("expr").unwrap();
    assert_close(expr[0], 4.0);
    assert_close(expr[2], 9.0);

    let het = table.column("het").unwrap();
    assert_close(het[0], 0.4);
    assert_close(het[1], 0.0);
    assert_close(het[2], 200.0 / 300.0);
}

#[rstest]
fn test_end_to_end_scores(fish: FishHook, exec: ExecutionContext) {
    let mut fish = fish;
    let scores = fish.score(&exec).unwrap();

    assert_eq!(scores.len(), 3);
    assert_eq!(scores.diagnostics.num_fitted, 3);
    for row in scores.iter() {
        assert_eq!(row.status, RowStatus::Fitted);
        let p = row.p.unwrap();
        assert!(p > 0.0 && p <= 1.0);
    }
    // geneC saw nothing
    assert_eq!(scores.rows[2].p, Some(1.0));
}

#[rstest]
fn test_annotation_is_idempotent(fish: FishHook, covariates: CovariateList, exec: ExecutionContext) {
    let mut fish = fish.with_covariates(&covariates).unwrap();
    assert!(!fish.is_annotated());

    fish.annotate(&exec).unwrap();
    let first = fish.covariate_values("rt").unwrap();
    fish.annotate(&exec).unwrap();
    let second = fish.covariate_values("rt").unwrap();

    assert!(fish.is_annotated());
    assert!(Arc::ptr_eq(&first, &second));
}

#[rstest]
fn test_scores_are_cached(mut fish: FishHook, exec: ExecutionContext) {
    let first = fish.score(&exec).unwrap();
    let second = fish.score(&exec).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[rstest]
fn test_merge_keeps_rows_and_existing_columns(fish: FishHook, exec: ExecutionContext) {
    let rt = read_bed("covariates/replication_timing.bed");
    let het = read_bed("covariates/heterochromatin.bed");

    let mut fish = fish
        .with_covariates(&Covariate::numeric_fields(&rt, &["rt"]).unwrap())
        .unwrap();
    fish.annotate(&exec).unwrap();
    let before = fish.covariate_values("rt").unwrap();

    let extra = CovariateList::try_from(vec![Covariate::interval("het", &het).unwrap()]).unwrap();
    let mut merged = fish.merge_covariates(&extra).unwrap();
    assert!(merged.covariate_values("het").is_none());

    let table = merged.annotate(&exec).unwrap();
    assert_eq!(table.len(), 3);
    assert_eq!(table.covariate_names, vec!["rt", "het"]);
    assert!(Arc::ptr_eq(&before, &merged.covariate_values("rt").unwrap()));
}

#[rstest]
fn test_merge_rejects_duplicate_names(fish: FishHook, covariates: CovariateList) {
    let fish = fish.with_covariates(&covariates).unwrap();
    let result = fish.merge_covariates(&covariates);
    assert!(matches!(result, Err(FishHookError::DuplicateCovariate(_))));
}

#[rstest]
fn test_subset_matches_fresh_annotation(fish: FishHook, covariates: CovariateList, exec: ExecutionContext) {
    let mut fish = fish.with_covariates(&covariates).unwrap();
    fish.annotate(&exec).unwrap();

    let mut subset = fish.subset_rows(&[2, 0]).unwrap();
    assert!(subset.is_annotated());
    let sliced = subset.annotate(&exec).unwrap();

    let mut fresh = FishHook::new(
        fish.hypotheses().subset(&[2, 0]),
        read_bed("events.bed"),
        read_bed("eligible.bed"),
        fish.config().clone(),
    )
    .unwrap()
    .with_covariates(&covariates)
    .unwrap();
    let recomputed = fresh.annotate(&exec).unwrap();

    assert_eq!(sliced.observed, recomputed.observed);
    assert_eq!(sliced.eligible_bases, recomputed.eligible_bases);
    assert_eq!(sliced.columns, recomputed.columns);
}

#[rstest]
fn test_subset_out_of_range(fish: FishHook) {
    assert!(matches!(
        fish.subset_rows(&[0, 3]),
        Err(FishHookError::RowOutOfRange { index: 3, len: 3 })
    ));
}

#[rstest]
fn test_filter_rows_by_chromosome(fish: FishHook) {
    let chr1 = fish.filter_rows(|_, region| region.chr == "chr1").unwrap();
    assert_eq!(chr1.len(), 2);
}

#[rstest]
fn test_replace_events_only_recounts(fish: FishHook, covariates: CovariateList, exec: ExecutionContext) {
    let mut fish = fish.with_covariates(&covariates).unwrap();
    fish.annotate(&exec).unwrap();
    let rt = fish.covariate_values("rt").unwrap();

    let mut events = read_bed("events.bed");
    events
        .regions
        .push(Region::point("chr1", 1400).unwrap().with_meta("sample", "sampleW"));
    let mut replaced = fish.replace_events(events).unwrap();

    // new events never lower a count
    let table = replaced.annotate(&exec).unwrap();
    assert_eq!(*table.observed, vec![2, 1, 0]);
    assert!(Arc::ptr_eq(&rt, &replaced.covariate_values("rt").unwrap()));
}

#[rstest]
fn test_replace_eligible_recomputes_everything(fish: FishHook, covariates: CovariateList, exec: ExecutionContext) {
    let mut fish = fish.with_covariates(&covariates).unwrap();
    fish.annotate(&exec).unwrap();

    let eligible = RegionSet::from(vec![Region::new("chr1", 1000, 1250).unwrap()]);
    let mut replaced = fish.replace_eligible(eligible).unwrap();
    assert!(!replaced.is_annotated());

    let table = replaced.annotate(&exec).unwrap();
    assert_eq!(*table.eligible_bases, vec![250, 0, 0]);
    assert_eq!(*table.observed, vec![1, 0, 0]);
    assert_close(table.column("rt").unwrap()[0], 0.2);
}

#[rstest]
fn test_missing_dedup_field_rejected() {
    let events = RegionSet::from(vec![Region::point("chr1", 1200).unwrap()]);
    let result = FishHook::new(
        read_bed("hypotheses.bed"),
        events,
        read_bed("eligible.bed"),
        FishHookConfig::default().with_dedup_key("sample"),
    );
    assert!(matches!(result, Err(FishHookError::MissingEventField { .. })));
}

#[rstest]
fn test_malformed_input_rejected() {
    let malformed = RegionSet::try_from(get_test_path("malformed.bed").as_path());
    assert!(malformed.is_err());
}

#[rstest]
fn test_duplicated_covariate_is_singular(fish: FishHook, exec: ExecutionContext) {
    let rt = read_bed("covariates/replication_timing.bed");
    let covariates = CovariateList::try_from(vec![
        Covariate::numeric("rt", &rt, "rt").unwrap(),
        Covariate::numeric("rt_copy", &rt, "rt").unwrap(),
    ])
    .unwrap();

    let mut fish = fish.with_covariates(&covariates).unwrap();
    match fish.score(&exec) {
        Err(FishHookError::SingularDesign { covariates }) => {
            assert_eq!(covariates, vec!["rt_copy".to_string()])
        }
        other => panic!("expected a singular design, got {other:?}"),
    }
}

#[rstest]
fn test_zero_eligible_rows_are_reported_not_fitted(fish: FishHook, exec: ExecutionContext) {
    let eligible = RegionSet::from(vec![
        Region::new("chr1", 1000, 1500).unwrap(),
        Region::new("chr2", 100, 400).unwrap(),
    ]);
    let mut fish = fish.replace_eligible(eligible).unwrap();
    let scores = fish.score(&exec).unwrap();

    assert_eq!(scores.len(), 3);
    assert_eq!(scores.rows[1].status, RowStatus::EmptyEligibleTerritory);
    assert_eq!(scores.rows[1].p, None);
    assert_eq!(scores.diagnostics.num_excluded, 1);
}

#[rstest]
fn test_below_threshold_rows_are_excluded(fish: FishHook, exec: ExecutionContext) {
    let mut config = fish.config().clone();
    config.min_eligible = 400;
    let mut fish = fish.with_config(config).unwrap();
    let scores = fish.score(&exec).unwrap();
    assert_eq!(scores.rows[2].status, RowStatus::BelowEligibleThreshold);
    assert_eq!(scores.rows[2].fdr, None);
}

#[rstest]
fn test_results_do_not_depend_on_thread_count() {
    let mut single = synthetic_fish(FishHookConfig::default());
    let mut parallel = single.clone();

    let a = single.score(&ExecutionContext::new(1)).unwrap();
    let b = parallel.score(&ExecutionContext::new(4)).unwrap();

    assert_eq!(a.rows, b.rows);
    assert_eq!(a.model, b.model);
}

#[rstest]
fn test_dropping_noise_covariate_keeps_hotspots() {
    let mut config = FishHookConfig::default();
    config.dispersion = DispersionMode::Poisson;
    let exec = ExecutionContext::new(2);

    let mut full = synthetic_fish(config);
    let mut reduced = full.drop_covariates(&["noise"]).unwrap();

    let with_noise = full.score(&exec).unwrap().significant(0.05);
    let without_noise = reduced.score(&exec).unwrap().significant(0.05);

    assert_eq!(with_noise, vec![10, 37]);
    assert_eq!(with_noise, without_noise);
}

#[rstest]
fn test_fdr_is_monotone_in_p() {
    let mut fish = synthetic_fish(FishHookConfig::default());
    let scores = fish.score(&ExecutionContext::default()).unwrap();

    let fitted: Vec<(f64, f64)> = scores
        .iter()
        .filter_map(|r| Some((r.p?, r.fdr?)))
        .collect();
    assert_eq!(fitted.len(), 100);
    for &(p_i, q_i) in &fitted {
        assert!(q_i >= p_i && q_i <= 1.0);
        for &(p_j, q_j) in &fitted {
            if p_i <= p_j {
                assert!(q_i <= q_j);
            }
        }
    }
}

#[rstest]
fn test_no_overdispersion_degenerates_to_poisson() {
    let hypotheses: RegionSet = (0..20u32)
        .map(|i| Region::new("chr1", i * 1000, i * 1000 + 500).unwrap())
        .collect();
    let events: RegionSet = (0..20u32)
        .flat_map(|i| [i * 1000 + 10, i * 1000 + 20])
        .map(|pos| Region::point("chr1", pos).unwrap())
        .collect();
    let eligible = RegionSet::from(vec![Region::new("chr1", 0, 20_000).unwrap()]);

    let mut nb = FishHook::new(hypotheses, events, eligible, FishHookConfig::default()).unwrap();
    let mut config = FishHookConfig::default();
    config.dispersion = DispersionMode::Poisson;
    let mut poisson = nb.with_config(config).unwrap();

    let exec = ExecutionContext::single_threaded();
    let nb_scores = nb.score(&exec).unwrap();
    let poisson_scores = poisson.score(&exec).unwrap();

    assert_eq!(nb_scores.model.alpha, 0.0);
    assert_eq!(nb_scores.rows, poisson_scores.rows);
}

#[rstest]
fn test_set_aggregates_are_member_sums() {
    let mut fish = synthetic_fish(FishHookConfig::default());
    let exec = ExecutionContext::default();

    let sets = vec![
        HypothesisSet::from_identifiers("hot", &["g10", "g37"], fish.hypotheses(), "name").unwrap(),
        HypothesisSet::new("cold", [1, 2, 3], fish.len()).unwrap(),
    ];
    let table = fish.score_sets(&sets, &exec).unwrap();
    let scores = fish.scores().unwrap();

    for result in &table.results {
        let observed: u64 = result.members.iter().map(|&i| scores.rows[i].observed).sum();
        let predicted: f64 = result
            .members
            .iter()
            .map(|&i| scores.rows[i].predicted.unwrap())
            .sum();
        assert_eq!(result.observed, observed);
        assert!((result.predicted.unwrap() - predicted).abs() < 1e-9);
    }

    let hot = table.get("hot").unwrap();
    let cold = table.get("cold").unwrap();
    assert_eq!(hot.observed, 80);
    assert!(hot.p.unwrap() < cold.p.unwrap());
    assert_eq!(table.containing(10).len(), 1);
}

#[rstest]
#[case(7)]
#[case(19)]
#[case(2024)]
fn test_shrinking_territory_never_adds_bases_or_events(#[case] seed: u64, exec: ExecutionContext) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut random_regions = |n: usize, max_len: u32| -> Vec<Region> {
        (0..n)
            .map(|_| {
                let chr = if rng.random_bool(0.7) { "chr1" } else { "chr2" };
                let start = rng.random_range(0..50_000u32);
                let len = rng.random_range(1..max_len);
                Region::new(chr, start, start + len).unwrap()
            })
            .collect()
    };

    let hypotheses = RegionSet::from(random_regions(80, 3000));
    let territory = RegionSet::from(random_regions(60, 5000));
    let mask = RegionSet::from(random_regions(40, 4000));
    let events: RegionSet = random_regions(600, 2)
        .into_iter()
        .enumerate()
        .map(|(i, r)| r.with_meta("sample", format!("s{}", i % 25)))
        .collect();
    let shrunk = territory.intersect(&mask);

    let mut config = FishHookConfig::default().with_dedup_key("sample");
    config.max_events_per_sample = 2;

    let mut full = FishHook::new(hypotheses, events, territory, config).unwrap();
    let mut reduced = full.replace_eligible(shrunk).unwrap();

    let before = full.annotate(&exec).unwrap();
    let after = reduced.annotate(&exec).unwrap();

    assert_eq!(before.len(), after.len());
    for i in 0..before.len() {
        assert!(
            after.eligible_bases[i] <= before.eligible_bases[i],
            "row {i}: {} > {}",
            after.eligible_bases[i],
            before.eligible_bases[i]
        );
        assert!(
            after.observed[i] <= before.observed[i],
            "row {i}: {} > {}",
            after.observed[i],
            before.observed[i]
        );
    }
    assert!(after.eligible_bases.iter().sum::<u64>() < before.eligible_bases.iter().sum::<u64>());
}
