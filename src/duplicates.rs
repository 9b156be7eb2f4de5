use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::mpsc;
use std::thread;
use std::time::Instant;

use crate::error::{Error, Result};
use crate::haar::{SketchType, Weights};
use crate::jobs::{CancelToken, JobEvent, JobScheduler, ProgressReporter, ThreadPoolScheduler, split_even};
use crate::reference::{ReferencePolicy, select_reference};
use crate::search::{
    Candidate, CandidatePool, Query, SearchRestriction, Threshold, ThresholdMatches,
    best_matches_with_threshold,
};
use crate::store::{CandidatePoolProvider, ItemInfo, MetadataProvider, ResultSink, SignatureStore};
use crate::{AlbumId, ImageId};

/// Below this many targets a scan runs as a single partition.
pub const PARALLEL_THRESHOLD: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateGroup {
    /// Mean of every similarity recorded between members during the run.
    pub similarity: f64,
    /// Sorted, reference included.
    pub members: Vec<ImageId>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DuplicatesResults {
    /// Groups keyed by their reference image.
    pub groups: BTreeMap<ImageId, DuplicateGroup>,
    /// Best similarity recorded per pair, keyed `(lower id, higher id)`.
    pub pair_similarities: BTreeMap<(ImageId, ImageId), f64>,
}

impl DuplicatesResults {
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// The group an image ended up in, with its reference.
    pub fn group_of(&self, id: ImageId) -> Option<(ImageId, &DuplicateGroup)> {
        self.groups
            .iter()
            .find(|(_, group)| group.members.binary_search(&id).is_ok())
            .map(|(reference, group)| (*reference, group))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DuplicatesOutcome {
    Completed(DuplicatesResults),
    Cancelled,
}

impl DuplicatesOutcome {
    /// The groups of a completed run, or [`Error::Cancelled`].
    pub fn into_result(self) -> Result<DuplicatesResults> {
        match self {
            DuplicatesOutcome::Completed(results) => Ok(results),
            DuplicatesOutcome::Cancelled => Err(Error::Cancelled),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DuplicateSearchOptions {
    pub threshold: Threshold,
    pub restriction: SearchRestriction,
    pub policy: ReferencePolicy,
    /// Albums consulted by the folder reference policies.
    pub reference_folders: HashSet<AlbumId>,
    pub sketch: SketchType,
    /// Threads of the pool a background job scans on; `None` uses every core.
    pub threads: Option<usize>,
    /// Explicit partition count; overrides the size heuristic.
    pub workers: Option<usize>,
    /// Images the targets are compared against. Defaults to the targets.
    pub candidates: Option<HashSet<ImageId>>,
    /// Only replace the saved searches of the groups found in this run.
    pub is_album_update: bool,
}

/// Number of partitions a scan of `targets` images is split into.
pub fn partition_count(targets: usize, parallelism: usize, workers: Option<usize>) -> usize {
    let wanted = match workers {
        Some(n) => n,
        None if targets < PARALLEL_THRESHOLD => 1,
        None => parallelism,
    };
    wanted.clamp(1, targets.max(1))
}

#[derive(Default)]
struct PartitionScan {
    results: Vec<(ImageId, ThresholdMatches)>,
    errors: Vec<Error>,
    cancelled: bool,
}

/// Finds disjoint groups of near-identical images among a target set.
pub struct DuplicatesFinder<'a, C> {
    catalog: &'a C,
    options: DuplicateSearchOptions,
    cancel: CancelToken,
    events: Option<mpsc::Sender<JobEvent>>,
}

impl<'a, C> DuplicatesFinder<'a, C>
where
    C: SignatureStore + CandidatePoolProvider + MetadataProvider,
{
    pub fn new(catalog: &'a C, options: DuplicateSearchOptions) -> Self {
        DuplicatesFinder {
            catalog,
            options,
            cancel: CancelToken::new(),
            events: None,
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_events(mut self, events: mpsc::Sender<JobEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Scan and merge. Nothing is written anywhere.
    pub fn run<S: JobScheduler>(&self, targets: &[ImageId], scheduler: &S) -> Result<DuplicatesOutcome> {
        let outcome = self.scan_and_merge(targets, scheduler);
        self.announce(&outcome);
        outcome
    }

    fn scan_and_merge<S: JobScheduler>(
        &self,
        targets: &[ImageId],
        scheduler: &S,
    ) -> Result<DuplicatesOutcome> {
        let started = Instant::now();
        let mut targets = targets.to_vec();
        targets.sort_unstable();
        targets.dedup();

        let scope = match &self.options.candidates {
            Some(candidates) => candidates.clone(),
            None => targets.iter().copied().collect(),
        };
        let pool = CandidatePool::build(self.catalog, self.catalog, Some(&scope))?;
        let queries = self.load_targets(&targets, &pool, &scope)?;

        let partitions = partition_count(queries.len(), scheduler.parallelism(), self.options.workers);
        log::info!(
            "Duplicate scan: {} targets against {} candidates in {} partition(s)",
            queries.len(),
            pool.len(),
            partitions
        );

        let progress = ProgressReporter::new(queries.len(), self.events.clone());
        let weights = Weights::get(self.options.sketch);
        let tasks: Vec<_> = split_even(&queries, partitions)
            .into_iter()
            .enumerate()
            .map(|(partition, chunk)| {
                let pool = &pool;
                let progress = &progress;
                let options = &self.options;
                let cancel = &self.cancel;
                move || scan_partition(partition, chunk, pool, options, weights, cancel, progress)
            })
            .collect();
        let scans = scheduler.run_partitioned(tasks);

        if self.cancel.is_cancelled() || scans.iter().any(|scan| scan.cancelled) {
            log::info!("Duplicate scan cancelled after {} images", progress.processed());
            return Ok(DuplicatesOutcome::Cancelled);
        }

        let mut results = Vec::new();
        let mut errors = Vec::new();
        for scan in scans {
            results.extend(scan.results);
            errors.extend(scan.errors);
        }
        if !errors.is_empty() {
            return Err(Error::ScanFailed(errors));
        }

        results.sort_by_key(|(id, _)| *id);
        let merged = self.merge(&results)?;
        log::info!(
            "Duplicate scan: {} groups in {:.1}s",
            merged.len(),
            started.elapsed().as_secs_f64()
        );
        Ok(DuplicatesOutcome::Completed(merged))
    }

    /// Query signatures for the targets, sorted by id. Targets inside the
    /// candidate scope come from the pool; others are read from the store.
    fn load_targets(
        &self,
        targets: &[ImageId],
        pool: &CandidatePool,
        scope: &HashSet<ImageId>,
    ) -> Result<Vec<Candidate>> {
        let mut queries = Vec::with_capacity(targets.len());
        for &id in targets {
            if let Some(candidate) = pool.get(id) {
                queries.push(candidate.clone());
                continue;
            }
            if scope.contains(&id) {
                log::debug!("Image {id} has no usable signature, skipping");
                continue;
            }
            match self.catalog.get(id) {
                Ok(Some(signature)) => {
                    let album = self.catalog.item_info(id)?.and_then(|info| info.album);
                    queries.push(Candidate { id, album, signature });
                }
                Ok(None) => log::debug!("Image {id} has no signature, skipping"),
                Err(e) if e.is_recoverable() => log::warn!("Skipping image {id}: {e}"),
                Err(e) => return Err(e),
            }
        }
        Ok(queries)
    }

    /// Union every `{target} + matches` cluster into disjoint groups.
    fn merge(&self, results: &[(ImageId, ThresholdMatches)]) -> Result<DuplicatesResults> {
        let mut index: HashMap<ImageId, usize> = HashMap::new();
        let mut ids: Vec<ImageId> = Vec::new();
        let mut slot = |id: ImageId, ids: &mut Vec<ImageId>| {
            *index.entry(id).or_insert_with(|| {
                ids.push(id);
                ids.len() - 1
            })
        };

        let mut edges = Vec::new();
        for (target, found) in results {
            let t = slot(*target, &mut ids);
            for (&id, &similarity) in &found.matches {
                edges.push((t, slot(id, &mut ids), similarity));
            }
        }

        let mut parent: Vec<usize> = (0..ids.len()).collect();

        fn find(parent: &mut [usize], mut x: usize) -> usize {
            while parent[x] != x {
                parent[x] = parent[parent[x]];
                x = parent[x];
            }
            x
        }

        fn union(parent: &mut [usize], a: usize, b: usize) {
            let ra = find(parent, a);
            let rb = find(parent, b);
            if ra != rb {
                parent[rb.max(ra)] = ra.min(rb);
            }
        }

        for &(a, b, _) in &edges {
            union(&mut parent, a, b);
        }

        // root -> (members, similarity sum, similarity count)
        let mut clusters: BTreeMap<usize, (Vec<ImageId>, f64, usize)> = BTreeMap::new();
        for i in 0..ids.len() {
            let root = find(&mut parent, i);
            clusters.entry(root).or_default().0.push(ids[i]);
        }

        let mut merged = DuplicatesResults::default();
        for &(a, b, similarity) in &edges {
            let root = find(&mut parent, a);
            if let Some(cluster) = clusters.get_mut(&root) {
                cluster.1 += similarity;
                cluster.2 += 1;
            }
            let pair = (ids[a].min(ids[b]), ids[a].max(ids[b]));
            let best = merged.pair_similarities.entry(pair).or_insert(similarity);
            *best = best.max(similarity);
        }

        for (mut members, sum, count) in clusters.into_values() {
            if members.len() < 2 {
                continue;
            }
            members.sort_unstable();
            let infos = members
                .iter()
                .map(|&id| self.item_info(id))
                .collect::<Result<Vec<_>>>()?;
            let Some(reference) =
                select_reference(self.options.policy, &infos, &self.options.reference_folders)
            else {
                continue;
            };
            merged.groups.insert(
                reference,
                DuplicateGroup {
                    similarity: sum / count.max(1) as f64,
                    members,
                },
            );
        }

        Ok(merged)
    }

    fn item_info(&self, id: ImageId) -> Result<ItemInfo> {
        Ok(self.catalog.item_info(id)?.unwrap_or_else(|| {
            log::debug!("No item info for image {id}");
            ItemInfo::new(id)
        }))
    }

    fn announce(&self, outcome: &Result<DuplicatesOutcome>) {
        let Some(tx) = &self.events else {
            return;
        };
        let event = match outcome {
            Ok(DuplicatesOutcome::Completed(results)) => JobEvent::Completed {
                groups: results.len(),
            },
            Ok(DuplicatesOutcome::Cancelled) => JobEvent::Cancelled,
            Err(e) => JobEvent::Failed(e.to_string()),
        };
        let _ = tx.send(event);
    }
}

impl<C> DuplicatesFinder<'_, C>
where
    C: SignatureStore + CandidatePoolProvider + MetadataProvider + ResultSink,
{
    /// Scan, merge, then hand the groups to the catalog as saved searches.
    /// A cancelled run writes nothing.
    pub fn run_and_persist<S: JobScheduler>(
        &self,
        targets: &[ImageId],
        scheduler: &S,
    ) -> Result<DuplicatesOutcome> {
        let outcome = self.scan_and_merge(targets, scheduler).and_then(|outcome| match outcome {
            DuplicatesOutcome::Completed(_) if self.cancel.is_cancelled() => {
                Ok(DuplicatesOutcome::Cancelled)
            }
            DuplicatesOutcome::Completed(results) => {
                self.catalog.rebuild_groups(&results, self.options.is_album_update)?;
                Ok(DuplicatesOutcome::Completed(results))
            }
            DuplicatesOutcome::Cancelled => Ok(DuplicatesOutcome::Cancelled),
        });
        self.announce(&outcome);
        outcome
    }
}

fn scan_partition(
    partition: usize,
    chunk: &[Candidate],
    pool: &CandidatePool,
    options: &DuplicateSearchOptions,
    weights: &Weights,
    cancel: &CancelToken,
    progress: &ProgressReporter,
) -> PartitionScan {
    let mut scan = PartitionScan::default();

    for target in chunk {
        if cancel.is_cancelled() {
            scan.cancelled = true;
            break;
        }
        match best_matches_with_threshold(
            &Query::from_candidate(target),
            pool,
            options.threshold,
            options.restriction,
            weights,
        ) {
            Ok(found) if found.matches.is_empty() => {}
            Ok(found) => scan.results.push((target.id, found)),
            Err(e) => {
                log::warn!("Duplicate scan of image {} failed: {e}", target.id);
                scan.errors.push(e);
            }
        }
        progress.tick();
    }

    progress.send(JobEvent::PartitionFinished {
        partition,
        matches: scan.results.len(),
    });
    scan
}

/// A duplicate scan running on its own thread.
pub struct DuplicatesJob {
    pub events: mpsc::Receiver<JobEvent>,
    cancel: CancelToken,
    handle: thread::JoinHandle<Result<DuplicatesOutcome>>,
}

impl DuplicatesJob {
    /// `open` runs on the job thread, so the catalog itself never has to
    /// cross threads. Results are persisted when the scan completes.
    pub fn start<C, F>(open: F, targets: Vec<ImageId>, options: DuplicateSearchOptions) -> Result<Self>
    where
        F: FnOnce() -> Result<C> + Send + 'static,
        C: SignatureStore + CandidatePoolProvider + MetadataProvider + ResultSink,
    {
        let (tx, rx) = mpsc::channel();
        let cancel = CancelToken::new();
        let token = cancel.clone();

        let handle = thread::Builder::new()
            .name("lookalike-duplicates".to_string())
            .spawn(move || {
                let catalog = match open() {
                    Ok(catalog) => catalog,
                    Err(e) => {
                        let _ = tx.send(JobEvent::Failed(e.to_string()));
                        return Err(e);
                    }
                };
                let scheduler = ThreadPoolScheduler::new(options.threads)?;
                DuplicatesFinder::new(&catalog, options)
                    .with_cancel_token(token)
                    .with_events(tx)
                    .run_and_persist(&targets, &scheduler)
            })?;

        Ok(DuplicatesJob {
            events: rx,
            cancel,
            handle,
        })
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) -> Result<DuplicatesOutcome> {
        self.handle
            .join()
            .unwrap_or_else(|_| Err(Error::JobFailed("duplicate scan thread panicked".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::haar::Signature;
    use crate::jobs::InlineScheduler;
    use crate::store::MemoryCatalog;
    use crate::testutil::noise_signature;

    /// `(id, album, seed)`; equal seeds give identical signatures.
    fn catalog(entries: &[(ImageId, AlbumId, u64)]) -> MemoryCatalog {
        let mut catalog = MemoryCatalog::new();
        for &(id, album, seed) in entries {
            catalog.add_item(ItemInfo {
                album: Some(album),
                file_size: 1000 + id as u64,
                ..ItemInfo::new(id)
            });
            catalog.put(id, &noise_signature(seed)).unwrap();
        }
        catalog
    }

    fn options() -> DuplicateSearchOptions {
        DuplicateSearchOptions {
            threshold: Threshold::from_percent(60.0, 100.0).unwrap(),
            ..Default::default()
        }
    }

    fn completed(outcome: DuplicatesOutcome) -> DuplicatesResults {
        match outcome {
            DuplicatesOutcome::Completed(results) => results,
            DuplicatesOutcome::Cancelled => panic!("run was cancelled"),
        }
    }

    #[test]
    fn identical_pair_forms_one_group_and_the_outlier_none() {
        // A and B are identical, C is unrelated.
        let catalog = catalog(&[(1, 1, 100), (2, 1, 100), (3, 1, 200)]);
        let finder = DuplicatesFinder::new(&catalog, options());
        let results = completed(finder.run(&[1, 2, 3], &InlineScheduler).unwrap());

        assert_eq!(results.len(), 1);
        let (reference, group) = results.group_of(1).unwrap();
        // Same undated files: the larger one wins.
        assert_eq!(reference, 2);
        assert_eq!(group.members, vec![1, 2]);
        assert_eq!(group.similarity, 1.0);
        assert!(results.group_of(3).is_none());
        assert_eq!(results.pair_similarities.get(&(1, 2)), Some(&1.0));
    }

    #[test]
    fn matching_clusters_become_disjoint_groups() {
        let catalog = catalog(&[(1, 1, 5), (2, 1, 5), (3, 2, 5), (4, 2, 6), (5, 3, 6), (6, 3, 7)]);
        let finder = DuplicatesFinder::new(&catalog, options());
        let results = completed(finder.run(&[1, 2, 3, 4, 5, 6], &InlineScheduler).unwrap());

        let mut groups: Vec<Vec<ImageId>> = results.groups.values().map(|g| g.members.clone()).collect();
        groups.sort();
        assert_eq!(groups, vec![vec![1, 2, 3], vec![4, 5]]);

        let mut seen = HashSet::new();
        for group in results.groups.values() {
            for id in &group.members {
                assert!(seen.insert(*id), "{id} is in two groups");
            }
        }
    }

    #[test]
    fn grouping_does_not_depend_on_partitioning() {
        let entries: Vec<(ImageId, AlbumId, u64)> =
            (1..=40).map(|id| (id, id % 3, (id % 13) as u64)).collect();
        let catalog = catalog(&entries);
        let targets: Vec<ImageId> = entries.iter().map(|e| e.0).collect();

        let single = DuplicatesFinder::new(
            &catalog,
            DuplicateSearchOptions {
                workers: Some(1),
                ..options()
            },
        )
        .run(&targets, &InlineScheduler)
        .unwrap();

        let pool = ThreadPoolScheduler::new(Some(4)).unwrap();
        let parallel = DuplicatesFinder::new(
            &catalog,
            DuplicateSearchOptions {
                workers: Some(5),
                ..options()
            },
        )
        .run(&targets, &pool)
        .unwrap();

        let single = completed(single);
        assert_eq!(single.len(), 13);
        assert_eq!(single, completed(parallel));
    }

    #[test]
    fn missing_and_malformed_targets_are_skipped() {
        let mut catalog = catalog(&[(1, 1, 9), (2, 1, 9)]);
        catalog.add_item(ItemInfo {
            album: Some(1),
            ..ItemInfo::new(3)
        });
        catalog.add_item(ItemInfo {
            album: Some(1),
            ..ItemInfo::new(4)
        });
        catalog.put_raw(4, vec![7; 12]);

        let results = completed(
            DuplicatesFinder::new(&catalog, options())
                .run(&[1, 2, 3, 4], &InlineScheduler)
                .unwrap(),
        );
        assert_eq!(results.groups.values().map(|g| g.members.clone()).collect::<Vec<_>>(), vec![vec![1, 2]]);
    }

    #[test]
    fn targets_outside_the_candidate_set_are_read_from_the_store() {
        let catalog = catalog(&[(1, 1, 3), (2, 2, 3), (3, 2, 4)]);
        let opts = DuplicateSearchOptions {
            candidates: Some([2, 3].into_iter().collect()),
            ..options()
        };
        let results = completed(DuplicatesFinder::new(&catalog, opts).run(&[1], &InlineScheduler).unwrap());
        assert_eq!(results.group_of(1).map(|(_, g)| g.members.clone()), Some(vec![1, 2]));
    }

    #[test]
    fn cancelled_run_persists_nothing() {
        let catalog = catalog(&[(1, 1, 1), (2, 1, 1)]);
        let token = CancelToken::new();
        token.cancel();
        let outcome = DuplicatesFinder::new(&catalog, options())
            .with_cancel_token(token)
            .run_and_persist(&[1, 2], &InlineScheduler)
            .unwrap();
        assert_eq!(outcome, DuplicatesOutcome::Cancelled);
        assert!(catalog.rebuilds().is_empty());
    }

    #[test]
    fn completed_run_is_persisted_once() {
        let catalog = catalog(&[(1, 1, 1), (2, 1, 1), (3, 1, 2)]);
        let opts = DuplicateSearchOptions {
            is_album_update: true,
            ..options()
        };
        let outcome = DuplicatesFinder::new(&catalog, opts)
            .run_and_persist(&[1, 2, 3], &InlineScheduler)
            .unwrap();

        let rebuilds = catalog.rebuilds();
        assert_eq!(rebuilds.len(), 1);
        assert!(rebuilds[0].1);
        assert_eq!(DuplicatesOutcome::Completed(rebuilds[0].0.clone()), outcome);
    }

    #[test]
    fn events_report_progress_and_completion() {
        let entries: Vec<(ImageId, AlbumId, u64)> = (1..=10).map(|id| (id, 1, (id % 2) as u64)).collect();
        let catalog = catalog(&entries);
        let (tx, rx) = mpsc::channel();
        let finder = DuplicatesFinder::new(
            &catalog,
            DuplicateSearchOptions {
                workers: Some(3),
                ..options()
            },
        )
        .with_events(tx);
        finder.run(&(1..=10).collect::<Vec<_>>(), &InlineScheduler).unwrap();
        drop(finder);

        let events: Vec<JobEvent> = rx.iter().collect();
        let finished = events
            .iter()
            .filter(|e| matches!(e, JobEvent::PartitionFinished { .. }))
            .count();
        assert_eq!(finished, 3);
        assert!(events.contains(&JobEvent::Progress {
            processed: 10,
            total: 10
        }));
        assert_eq!(events.last(), Some(&JobEvent::Completed { groups: 2 }));
    }

    #[test]
    fn empty_target_set_completes_empty() {
        let catalog = catalog(&[(1, 1, 1)]);
        let results = completed(DuplicatesFinder::new(&catalog, options()).run(&[], &InlineScheduler).unwrap());
        assert!(results.is_empty());
    }

    #[test]
    fn partition_count_follows_target_size() {
        assert_eq!(partition_count(10, 8, None), 1);
        assert_eq!(partition_count(PARALLEL_THRESHOLD, 8, None), 8);
        assert_eq!(partition_count(3, 8, Some(6)), 3);
        assert_eq!(partition_count(0, 8, None), 1);
    }

    #[test]
    fn pool_size_does_not_split_small_scans() {
        let opts = DuplicateSearchOptions {
            threads: Some(8),
            ..options()
        };
        assert_eq!(partition_count(50, 8, opts.workers), 1);
    }

    /// Wraps a memory catalog and fails the way a broken database would.
    #[derive(Default)]
    struct FlakyCatalog {
        inner: MemoryCatalog,
        walk_fails: bool,
        reads_fail: bool,
        /// `get` hands out a signature with an out-of-range coefficient.
        reads_corrupt: bool,
    }

    impl SignatureStore for FlakyCatalog {
        fn get(&self, id: ImageId) -> Result<Option<Signature>> {
            if self.reads_fail {
                return Err(Error::StoreUnavailable("disk I/O error".to_string()));
            }
            let mut signature = self.inner.get(id)?;
            if self.reads_corrupt {
                if let Some(sig) = signature.as_mut() {
                    sig.coefficients[0][0] = 0;
                }
            }
            Ok(signature)
        }

        fn put(&self, id: ImageId, sig: &Signature) -> Result<()> {
            self.inner.put(id, sig)
        }

        fn remove(&self, id: ImageId) -> Result<()> {
            self.inner.remove(id)
        }

        fn for_each(&self, visit: &mut dyn FnMut(ImageId, Result<Signature>)) -> Result<()> {
            if self.walk_fails {
                return Err(Error::StoreUnavailable("no such table: haar_matrix".to_string()));
            }
            self.inner.for_each(visit)
        }
    }

    impl CandidatePoolProvider for FlakyCatalog {
        fn images_in_album(&self, album: AlbumId) -> Result<Vec<ImageId>> {
            self.inner.images_in_album(album)
        }

        fn images_with_tag(&self, tag: crate::TagId) -> Result<Vec<ImageId>> {
            self.inner.images_with_tag(tag)
        }

        fn album_memberships(&self) -> Result<HashMap<ImageId, AlbumId>> {
            self.inner.album_memberships()
        }
    }

    impl MetadataProvider for FlakyCatalog {
        fn item_info(&self, id: ImageId) -> Result<Option<ItemInfo>> {
            self.inner.item_info(id)
        }
    }

    impl ResultSink for FlakyCatalog {
        fn rebuild_groups(&self, results: &DuplicatesResults, is_album_update: bool) -> Result<()> {
            self.inner.rebuild_groups(results, is_album_update)
        }
    }

    #[test]
    fn unreadable_store_aborts_before_scanning() {
        let catalog = FlakyCatalog {
            inner: catalog(&[(1, 1, 1), (2, 1, 1)]),
            walk_fails: true,
            ..Default::default()
        };
        let (tx, rx) = mpsc::channel();
        let finder = DuplicatesFinder::new(&catalog, options()).with_events(tx);
        let outcome = finder.run_and_persist(&[1, 2], &InlineScheduler);
        drop(finder);

        assert!(matches!(outcome, Err(Error::StoreUnavailable(_))));
        assert!(catalog.inner.rebuilds().is_empty());
        let events: Vec<JobEvent> = rx.iter().collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], JobEvent::Failed(_)));
    }

    #[test]
    fn failed_target_read_aborts_the_run() {
        let catalog = FlakyCatalog {
            inner: catalog(&[(1, 1, 3), (2, 2, 3), (3, 2, 4)]),
            reads_fail: true,
            ..Default::default()
        };
        let opts = DuplicateSearchOptions {
            candidates: Some([2, 3].into_iter().collect()),
            ..options()
        };
        let outcome = DuplicatesFinder::new(&catalog, opts).run_and_persist(&[1], &InlineScheduler);
        assert!(matches!(outcome, Err(Error::StoreUnavailable(_))));
        assert!(catalog.inner.rebuilds().is_empty());
    }

    #[test]
    fn scan_errors_are_reported_together() {
        let catalog = FlakyCatalog {
            inner: catalog(&[(1, 1, 3), (2, 1, 5), (3, 2, 3), (4, 2, 5)]),
            reads_corrupt: true,
            ..Default::default()
        };
        let opts = DuplicateSearchOptions {
            candidates: Some([3, 4].into_iter().collect()),
            ..options()
        };
        let outcome = DuplicatesFinder::new(&catalog, opts).run_and_persist(&[1, 2], &InlineScheduler);
        match outcome {
            Err(Error::ScanFailed(errors)) => {
                assert_eq!(errors.len(), 2);
                assert!(errors.iter().all(|e| matches!(e, Error::IncompatibleSignature(_))));
            }
            other => panic!("expected a failed scan, got {other:?}"),
        }
        assert!(catalog.inner.rebuilds().is_empty());
    }

    #[test]
    fn cancelled_outcome_converts_to_an_error() {
        assert!(matches!(
            DuplicatesOutcome::Cancelled.into_result(),
            Err(Error::Cancelled)
        ));
        let results = DuplicatesOutcome::Completed(DuplicatesResults::default())
            .into_result()
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn background_job_reports_through_its_channel() {
        let job = DuplicatesJob::start(
            || Ok(catalog(&[(1, 1, 4), (2, 2, 4), (3, 3, 8)])),
            vec![1, 2, 3],
            options(),
        )
        .unwrap();

        let events: Vec<JobEvent> = job.events.iter().collect();
        assert_eq!(events.last(), Some(&JobEvent::Completed { groups: 1 }));
        let results = completed(job.join().unwrap());
        assert_eq!(results.group_of(2).map(|(_, g)| g.members.clone()), Some(vec![1, 2]));
    }
}
