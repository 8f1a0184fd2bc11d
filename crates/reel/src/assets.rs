use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use crate::compose::Slot;
use crate::error::PipelineError;
use crate::pool;
use crate::topic::Topic;

/// Sub-pool an asset is requested from.
///
/// `RandomClips` is not a topic directory; it names the global pool so its
/// consumption can be tracked alongside the topic roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Intro,
    Photos,
    Clips,
    RandomClips,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Intro => "intro",
            Role::Photos => "photos",
            Role::Clips => "clips",
            Role::RandomClips => "random_clips",
        }
    }
}

/// Directory an asset was drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolSource {
    Topic(Topic, Role),
    OtherClips,
    RandomClips,
}

impl PoolSource {
    pub fn dir(&self, content_root: &Path) -> PathBuf {
        match self {
            PoolSource::Topic(topic, role) => content_root.join(topic.as_str()).join(role.as_str()),
            PoolSource::OtherClips => content_root.join("other_clips"),
            PoolSource::RandomClips => content_root.join("random_clips"),
        }
    }
}

impl fmt::Display for PoolSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolSource::Topic(topic, role) => write!(f, "{}/{}", topic, role.as_str()),
            PoolSource::OtherClips => f.write_str("other_clips"),
            PoolSource::RandomClips => f.write_str("random_clips"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Image,
    Video,
}

/// A chosen file and where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
    pub path: PathBuf,
    pub kind: AssetKind,
    pub source: PoolSource,
    /// Upper bound on how much of the source to use, in seconds
    pub trim: Option<f64>,
}

/// Assets already used by one job, per role
#[derive(Debug, Clone, Default)]
pub struct SelectionState {
    consumed: HashMap<Role, Vec<PathBuf>>,
}

impl SelectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consumed(&self, role: Role) -> &[PathBuf] {
        self.consumed.get(&role).map(Vec::as_slice).unwrap_or(&[])
    }

    fn record(&mut self, role: Role, path: &Path) {
        self.consumed.entry(role).or_default().push(path.to_path_buf());
    }
}

/// One pick per slot, in selection order
#[derive(Debug, Clone)]
pub struct Selection {
    pub picks: Vec<(Slot, Asset)>,
}

impl Selection {
    pub fn get(&self, slot: Slot) -> Option<&Asset> {
        self.picks.iter().find(|(s, _)| *s == slot).map(|(_, a)| a)
    }
}

/// Chooses assets from the on-disk pools
#[derive(Debug, Clone)]
pub struct AssetSelector {
    content_root: PathBuf,
    other_clips_trim: f64,
}

impl AssetSelector {
    pub fn new(content_root: impl Into<PathBuf>, other_clips_trim: f64) -> Self {
        Self {
            content_root: content_root.into(),
            other_clips_trim,
        }
    }

    pub fn content_root(&self) -> &Path {
        &self.content_root
    }

    fn trim_for(&self, source: PoolSource, requested: Option<f64>) -> Option<f64> {
        match source {
            PoolSource::OtherClips => Some(self.other_clips_trim),
            _ => requested,
        }
    }

    fn asset(&self, path: PathBuf, source: PoolSource, requested: Option<f64>) -> Asset {
        let kind = if pool::is_image(&path) { AssetKind::Image } else { AssetKind::Video };
        Asset {
            path,
            kind,
            source,
            trim: self.trim_for(source, requested),
        }
    }

    fn chain(topic: Topic, role: Role) -> Vec<PoolSource> {
        match role {
            Role::RandomClips => vec![PoolSource::RandomClips, PoolSource::OtherClips],
            _ => vec![
                PoolSource::Topic(topic, role),
                PoolSource::OtherClips,
                PoolSource::RandomClips,
            ],
        }
    }

    /// Pick one asset for `(topic, role)`.
    ///
    /// The first pool in the chain with any files wins. Within that pool,
    /// files in `excluded` are skipped unless nothing else is left, in which
    /// case the whole listing is reused.
    pub fn pick_asset<R: Rng + ?Sized>(
        &self,
        topic: Topic,
        role: Role,
        excluded: &[PathBuf],
        trim: Option<f64>,
        rng: &mut R,
    ) -> Result<Asset, PipelineError> {
        let chain = Self::chain(topic, role);
        let mut tried = Vec::new();

        for source in chain.iter().copied() {
            tried.push(source.to_string());
            let listing = pool::list_pool(&source.dir(&self.content_root));
            if listing.is_empty() {
                debug!("Pool {} is empty, falling back", source);
                continue;
            }

            let fresh: Vec<&PathBuf> = listing.iter().filter(|p| !excluded.contains(p)).collect();
            let picked = if fresh.is_empty() {
                warn!("🔄 Pool {} exhausted ({} files), reusing an asset", source, listing.len());
                listing.choose(rng)
            } else {
                fresh.choose(rng).copied()
            };

            if let Some(path) = picked {
                if source != chain[0] {
                    info!("Pool {} empty, using {} instead", chain[0], source);
                }
                return Ok(self.asset(path.clone(), source, trim));
            }
        }

        Err(PipelineError::AssetNotFound {
            request: format!("{}/{}", topic, role.as_str()),
            tried,
        })
    }

    /// Strict fallback for the second topic clip: each pool minus `excluded`,
    /// never reusing, never returning `first`.
    fn pick_strict<R: Rng + ?Sized>(
        &self,
        sources: &[PoolSource],
        first: &Path,
        excluded: &[PathBuf],
        trim: Option<f64>,
        rng: &mut R,
        tried: &mut Vec<String>,
    ) -> Option<Asset> {
        for source in sources.iter().copied() {
            tried.push(source.to_string());
            let listing = pool::list_pool(&source.dir(&self.content_root));
            let fresh: Vec<&PathBuf> = listing
                .iter()
                .filter(|p| p.as_path() != first && !excluded.contains(p))
                .collect();
            if let Some(path) = fresh.choose(rng) {
                return Some(self.asset((*path).clone(), source, trim));
            }
        }
        None
    }

    /// Pick the second topic clip so that it never equals `first`.
    ///
    /// A normal pick that collides with `first` is discarded and the
    /// request goes to `other_clips` then `random_clips` instead.
    pub fn pick_second_topic_clip<R: Rng + ?Sized>(
        &self,
        topic: Topic,
        first: &Path,
        excluded: &[PathBuf],
        trim: Option<f64>,
        rng: &mut R,
    ) -> Result<Asset, PipelineError> {
        let mut tried = vec![format!("{}/{}", topic, Role::Clips.as_str())];

        match self.pick_asset(topic, Role::Clips, excluded, trim, rng) {
            Ok(asset) if asset.path != first => return Ok(asset),
            Ok(asset) => info!("Second clip repeated {}, using fallback pools", asset.path.display()),
            Err(PipelineError::AssetNotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        let fallback = [PoolSource::OtherClips, PoolSource::RandomClips];
        self.pick_strict(&fallback, first, excluded, trim, rng, &mut tried)
            .ok_or(PipelineError::AssetNotFound {
                request: format!("{}/{} (second clip)", topic, Role::Clips.as_str()),
                tried,
            })
    }

    /// Choose the six assets of one reel, recording each in `state`.
    pub fn select_sequence<R: Rng + ?Sized>(
        &self,
        topic: Topic,
        segment_secs: f64,
        state: &mut SelectionState,
        rng: &mut R,
    ) -> Result<Selection, PipelineError> {
        let clip_trim = Some(segment_secs);
        let mut picks = Vec::with_capacity(Slot::ALL.len());

        let intro = self.pick_asset(topic, Role::Intro, state.consumed(Role::Intro), None, rng)?;
        state.record(Role::Intro, &intro.path);
        picks.push((Slot::Intro, intro));

        let photo1 = self.pick_asset(topic, Role::Photos, state.consumed(Role::Photos), None, rng)?;
        state.record(Role::Photos, &photo1.path);
        picks.push((Slot::Photo1, photo1));

        let random = self.pick_asset(
            topic,
            Role::RandomClips,
            state.consumed(Role::RandomClips),
            clip_trim,
            rng,
        )?;
        state.record(Role::RandomClips, &random.path);
        picks.push((Slot::RandomClip, random));

        let mut stills: Vec<PathBuf> = state.consumed(Role::Intro).to_vec();
        stills.extend_from_slice(state.consumed(Role::Photos));
        let photo2 = self.pick_asset(topic, Role::Photos, &stills, None, rng)?;
        state.record(Role::Photos, &photo2.path);
        picks.push((Slot::Photo2, photo2));

        let clip1 = self.pick_asset(topic, Role::Clips, state.consumed(Role::Clips), clip_trim, rng)?;
        state.record(Role::Clips, &clip1.path);
        let first = clip1.path.clone();
        picks.push((Slot::TopicClip1, clip1));

        let clip2 = self.pick_second_topic_clip(topic, &first, state.consumed(Role::Clips), clip_trim, rng)?;
        state.record(Role::Clips, &clip2.path);
        picks.push((Slot::TopicClip2, clip2));

        for (slot, asset) in &picks {
            debug!("{:?} <- {} ({})", slot, asset.path.display(), asset.source);
        }
        Ok(Selection { picks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::fs;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        fs::create_dir_all(dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, b"x").unwrap();
        path
    }

    /// Content tree with `photos` photos and `clips` clips for graphs
    fn build_tree(root: &Path, photos: usize, clips: usize, other: usize, random: usize) {
        let topic = root.join("graphs");
        touch(&topic.join("intro"), "intro.png");
        for i in 0..photos {
            touch(&topic.join("photos"), &format!("photo{}.jpg", i));
        }
        for i in 0..clips {
            touch(&topic.join("clips"), &format!("clip{}.mp4", i));
        }
        for i in 0..other {
            touch(&root.join("other_clips"), &format!("other{}.mp4", i));
        }
        for i in 0..random {
            touch(&root.join("random_clips"), &format!("random{}.mp4", i));
        }
    }

    #[test]
    fn test_sequence_covers_every_slot_once() {
        let root = tempfile::tempdir().unwrap();
        build_tree(root.path(), 3, 3, 1, 2);
        let selector = AssetSelector::new(root.path(), 7.0);
        let mut state = SelectionState::new();
        let mut rng = StdRng::seed_from_u64(1);

        let selection = selector.select_sequence(Topic::Graphs, 5.0, &mut state, &mut rng).unwrap();
        assert_eq!(selection.picks.len(), 6);
        for slot in Slot::ALL {
            assert!(selection.get(slot).is_some(), "missing {:?}", slot);
        }
        assert_eq!(selection.get(Slot::Intro).unwrap().kind, AssetKind::Image);
        assert_eq!(selection.get(Slot::TopicClip1).unwrap().trim, Some(5.0));
        assert_eq!(selection.get(Slot::Photo1).unwrap().trim, None);
        assert_eq!(state.consumed(Role::Photos).len(), 2);
        assert_eq!(state.consumed(Role::Clips).len(), 2);
    }

    #[test]
    fn test_same_seed_same_selection() {
        let root = tempfile::tempdir().unwrap();
        build_tree(root.path(), 5, 5, 3, 3);
        let selector = AssetSelector::new(root.path(), 7.0);

        let run = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            selector
                .select_sequence(Topic::Graphs, 5.0, &mut SelectionState::new(), &mut rng)
                .unwrap()
                .picks
                .into_iter()
                .map(|(_, a)| a.path)
                .collect::<Vec<_>>()
        };
        assert_eq!(run(42), run(42));
    }

    #[test]
    fn test_empty_role_falls_back_to_other_clips_with_fixed_trim() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("graphs").join("clips")).unwrap();
        let other = touch(&root.path().join("other_clips"), "o.mp4");
        let selector = AssetSelector::new(root.path(), 7.0);
        let mut rng = StdRng::seed_from_u64(0);

        let asset = selector.pick_asset(Topic::Graphs, Role::Clips, &[], Some(5.0), &mut rng).unwrap();
        assert_eq!(asset.path, other);
        assert_eq!(asset.source, PoolSource::OtherClips);
        assert_eq!(asset.trim, Some(7.0));
    }

    #[test]
    fn test_random_clips_fallback_keeps_caller_trim() {
        let root = tempfile::tempdir().unwrap();
        let random = touch(&root.path().join("random_clips"), "r.mp4");
        let selector = AssetSelector::new(root.path(), 7.0);
        let mut rng = StdRng::seed_from_u64(0);

        let asset = selector.pick_asset(Topic::Trees, Role::Intro, &[], Some(5.0), &mut rng).unwrap();
        assert_eq!(asset.path, random);
        assert_eq!(asset.source, PoolSource::RandomClips);
        assert_eq!(asset.trim, Some(5.0));
    }

    #[test]
    fn test_all_pools_empty_is_asset_not_found() {
        let root = tempfile::tempdir().unwrap();
        let selector = AssetSelector::new(root.path(), 7.0);
        let mut rng = StdRng::seed_from_u64(0);

        let err = selector.pick_asset(Topic::Stack, Role::Photos, &[], None, &mut rng).unwrap_err();
        match err {
            PipelineError::AssetNotFound { request, tried } => {
                assert_eq!(request, "stack/photos");
                assert_eq!(tried, vec!["stack/photos", "other_clips", "random_clips"]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_exhausted_pool_reuses() {
        let root = tempfile::tempdir().unwrap();
        let only = touch(&root.path().join("graphs").join("photos"), "p.png");
        let selector = AssetSelector::new(root.path(), 7.0);
        let mut rng = StdRng::seed_from_u64(0);

        let asset = selector
            .pick_asset(Topic::Graphs, Role::Photos, &[only.clone()], None, &mut rng)
            .unwrap();
        assert_eq!(asset.path, only);
    }

    #[test]
    fn test_single_topic_clip_routes_second_pick_to_fallback() {
        let root = tempfile::tempdir().unwrap();
        build_tree(root.path(), 2, 1, 1, 0);
        let selector = AssetSelector::new(root.path(), 7.0);
        let mut rng = StdRng::seed_from_u64(3);

        let selection = selector
            .select_sequence(Topic::Graphs, 5.0, &mut SelectionState::new(), &mut rng)
            .unwrap();
        let clip2 = selection.get(Slot::TopicClip2).unwrap();
        assert_eq!(clip2.source, PoolSource::OtherClips);
        assert_eq!(clip2.trim, Some(7.0));
    }

    #[test]
    fn test_single_topic_clip_without_fallback_fails() {
        let root = tempfile::tempdir().unwrap();
        build_tree(root.path(), 2, 1, 0, 0);
        touch(&root.path().join("random_clips"), "r.mp4");
        let selector = AssetSelector::new(root.path(), 7.0);
        let mut rng = StdRng::seed_from_u64(3);

        // random_clips is consumed by its own slot but still eligible for the
        // second clip, since exclusion is per role
        let selection = selector
            .select_sequence(Topic::Graphs, 5.0, &mut SelectionState::new(), &mut rng)
            .unwrap();
        assert_eq!(selection.get(Slot::TopicClip2).unwrap().source, PoolSource::RandomClips);

        fs::remove_dir_all(root.path().join("random_clips")).unwrap();
        let err = selector
            .select_sequence(Topic::Graphs, 5.0, &mut SelectionState::new(), &mut rng)
            .unwrap_err();
        assert_eq!(err.kind(), "AssetNotFound");
    }

    #[test]
    fn test_second_clip_never_reuses_other_clips_first_pick() {
        let root = tempfile::tempdir().unwrap();
        build_tree(root.path(), 2, 0, 1, 1);
        let selector = AssetSelector::new(root.path(), 7.0);
        let mut rng = StdRng::seed_from_u64(9);

        let selection = selector
            .select_sequence(Topic::Graphs, 5.0, &mut SelectionState::new(), &mut rng)
            .unwrap();
        let clip1 = selection.get(Slot::TopicClip1).unwrap();
        let clip2 = selection.get(Slot::TopicClip2).unwrap();
        assert_eq!(clip1.source, PoolSource::OtherClips);
        assert_ne!(clip1.path, clip2.path);
        assert_eq!(clip2.source, PoolSource::RandomClips);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Same-role picks are distinct whenever the pool has two or more
        /// files, and the two topic clips never match
        #[test]
        fn test_selection_uniqueness(
            photos in 1usize..5,
            clips in 1usize..5,
            other in 0usize..3,
            random in 1usize..3,
            seed in any::<u64>(),
        ) {
            let root = tempfile::tempdir().unwrap();
            build_tree(root.path(), photos, clips, other, random);
            let selector = AssetSelector::new(root.path(), 7.0);
            let mut rng = StdRng::seed_from_u64(seed);

            let result = selector.select_sequence(Topic::Graphs, 5.0, &mut SelectionState::new(), &mut rng);
            let selection = match result {
                Ok(s) => s,
                Err(e) => {
                    // Only reachable with one topic clip and no spare fallback clip
                    prop_assert_eq!(clips, 1);
                    prop_assert_eq!(e.kind(), "AssetNotFound");
                    return Ok(());
                }
            };

            prop_assert_eq!(selection.picks.len(), 6);
            let p1 = &selection.get(Slot::Photo1).unwrap().path;
            let p2 = &selection.get(Slot::Photo2).unwrap().path;
            if photos >= 2 {
                prop_assert_ne!(p1, p2);
            }
            let c1 = &selection.get(Slot::TopicClip1).unwrap().path;
            let c2 = &selection.get(Slot::TopicClip2).unwrap().path;
            prop_assert_ne!(c1, c2);
            if clips >= 2 {
                prop_assert_eq!(selection.get(Slot::TopicClip2).unwrap().source, PoolSource::Topic(Topic::Graphs, Role::Clips));
            }
        }
    }
}
