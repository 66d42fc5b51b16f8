//! Track segment metadata and location
//!
//! `TrackCatalog` resolves a track name to its segment list through a
//! layered lookup: in-memory cache, then a local JSON file, then an
//! optional generator (typically backed by the LLM). Generator output is
//! validated before use: spans must cover [0, 1] after sorting and use the
//! closed segment-type set. `SegmentLocator` answers "which segment is this
//! lap fraction in" with a one-entry cache, falling back to a single
//! whole-track segment when no metadata exists.

use orc_core::model::{SegmentKind, TrackSegment};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Supplies segments for tracks the catalog has never seen. Implemented by
/// the LLM enricher; tests plug in canned generators.
pub trait SegmentGenerator: Send {
    fn generate(&mut self, track_name: &str) -> Option<Vec<TrackSegment>>;
}

pub struct TrackCatalog {
    tracks: HashMap<String, Vec<TrackSegment>>,
    cache_file: Option<PathBuf>,
    generator: Option<Box<dyn SegmentGenerator>>,
}

impl TrackCatalog {
    pub fn new(cache_file: Option<PathBuf>) -> Self {
        let mut catalog = Self {
            tracks: builtin_tracks(),
            cache_file,
            generator: None,
        };
        catalog.load_cache();
        catalog
    }

    pub fn with_generator(mut self, generator: Box<dyn SegmentGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Layered lookup: memory, then local file (loaded at construction),
    /// then the generator. Returns `None` when nothing produced valid
    /// segments.
    pub fn get_segments(&mut self, track_name: &str) -> Option<Vec<TrackSegment>> {
        if track_name.is_empty() {
            return None;
        }
        if let Some(segments) = self.tracks.get(track_name) {
            return Some(segments.clone());
        }

        if let Some(generator) = self.generator.as_mut() {
            info!(track = track_name, "generating segment metadata");
            if let Some(raw) = generator.generate(track_name) {
                match validate_segments(raw) {
                    Ok(segments) => {
                        self.tracks.insert(track_name.to_string(), segments.clone());
                        self.save_cache();
                        return Some(segments);
                    }
                    Err(e) => warn!(track = track_name, error = e, "generated segments rejected"),
                }
            }
        }
        None
    }

    fn load_cache(&mut self) {
        let Some(path) = &self.cache_file else { return };
        let Ok(text) = std::fs::read_to_string(path) else { return };
        match serde_json::from_str::<HashMap<String, Vec<TrackSegment>>>(&text) {
            Ok(map) => {
                debug!(tracks = map.len(), "loaded track segment cache");
                for (name, raw) in map {
                    if let Ok(segments) = validate_segments(raw) {
                        self.tracks.insert(name, segments);
                    }
                }
            }
            Err(e) => warn!(error = %e, "ignoring corrupt track cache"),
        }
    }

    fn save_cache(&self) {
        let Some(path) = &self.cache_file else { return };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(&self.tracks) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    warn!(error = %e, "failed to save track cache");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize track cache"),
        }
    }
}

/// Sort, then require full [0, 1] coverage without gaps or overlaps and
/// non-empty names/descriptions.
pub fn validate_segments(mut segments: Vec<TrackSegment>) -> Result<Vec<TrackSegment>, &'static str> {
    if segments.is_empty() {
        return Err("no segments");
    }
    segments.sort_by(|a, b| a.start_pct.total_cmp(&b.start_pct));

    const EPS: f64 = 0.01;
    if segments[0].start_pct.abs() > EPS {
        return Err("does not start at 0.0");
    }
    if (segments[segments.len() - 1].end_pct - 1.0).abs() > EPS {
        return Err("does not end at 1.0");
    }
    for pair in segments.windows(2) {
        if (pair[0].end_pct - pair[1].start_pct).abs() > EPS {
            return Err("gap or overlap between segments");
        }
    }
    for segment in &mut segments {
        if segment.name.trim().is_empty() {
            return Err("segment without a name");
        }
        if segment.end_pct <= segment.start_pct {
            return Err("empty segment span");
        }
        if segment.id.is_empty() {
            segment.id = segment.name.to_lowercase().replace(' ', "_");
        }
    }
    // Snap the boundary values so downstream interval math is exact.
    segments[0].start_pct = 0.0;
    let last = segments.len() - 1;
    segments[last].end_pct = 1.0;
    Ok(segments)
}

/// Interval lookup with a one-entry cache; pure apart from the cache.
pub struct SegmentLocator {
    segments: Vec<TrackSegment>,
    fallback: TrackSegment,
    cached_index: Option<usize>,
}

impl SegmentLocator {
    pub fn new(segments: Vec<TrackSegment>) -> Self {
        Self {
            segments,
            fallback: TrackSegment::whole_track(),
            cached_index: None,
        }
    }

    pub fn without_metadata() -> Self {
        Self::new(Vec::new())
    }

    pub fn has_metadata(&self) -> bool {
        !self.segments.is_empty()
    }

    /// The segment enclosing the fraction; the whole-track segment when no
    /// metadata is available.
    pub fn current_segment(&mut self, lap_dist_pct: f64) -> &TrackSegment {
        if self.segments.is_empty() {
            return &self.fallback;
        }
        let pct = lap_dist_pct.rem_euclid(1.0);

        if let Some(i) = self.cached_index {
            if self.segments[i].contains(pct) {
                return &self.segments[i];
            }
        }
        let found = self.segments.iter().position(|s| s.contains(pct));
        match found {
            Some(i) => {
                self.cached_index = Some(i);
                &self.segments[i]
            }
            // pct == 1.0 exactly, or float dust at a boundary.
            None => self.segments.last().unwrap_or(&self.fallback),
        }
    }

    /// Corner segments only, for the micro-analyzer's naming.
    pub fn corner_name_at(&mut self, lap_dist_pct: f64) -> Option<String> {
        if !self.has_metadata() {
            return None;
        }
        let segment = self.current_segment(lap_dist_pct);
        matches!(segment.kind, SegmentKind::Corner | SegmentKind::Chicane)
            .then(|| segment.name.clone())
    }
}

/// Built-in segment tables for a few common circuits.
fn builtin_tracks() -> HashMap<String, Vec<TrackSegment>> {
    let mut tracks = HashMap::new();

    let spa = vec![
        seg("la_source", "La Source", SegmentKind::Corner, 0.00, 0.03, "Tight right-hander after start/finish"),
        seg("eau_rouge", "Eau Rouge", SegmentKind::Corner, 0.03, 0.08, "Uphill left-right complex"),
        seg("kemmel", "Kemmel Straight", SegmentKind::Straight, 0.08, 0.15, "Long uphill straight"),
        seg("les_combes", "Les Combes", SegmentKind::Chicane, 0.15, 0.22, "Medium-speed left-right"),
        seg("bruxelles", "Bruxelles", SegmentKind::Corner, 0.22, 0.28, "Medium-speed left-hander"),
        seg("pouhon", "Pouhon", SegmentKind::Corner, 0.28, 0.35, "High-speed double-left"),
        seg("fagnes", "Fagnes", SegmentKind::Corner, 0.35, 0.42, "Medium-speed right-hander"),
        seg("stavelot", "Stavelot", SegmentKind::Corner, 0.42, 0.48, "High-speed right-hander"),
        seg("blanchimont", "Blanchimont", SegmentKind::Corner, 0.48, 0.55, "High-speed left-hander"),
        seg("bus_stop", "Bus Stop", SegmentKind::Chicane, 0.55, 0.62, "Tight chicane before the final straight"),
        seg("final_straight", "Final Straight", SegmentKind::Straight, 0.62, 1.00, "Run to the finish"),
    ];
    tracks.insert("Spa-Francorchamps".to_string(), spa);

    let monza = vec![
        seg("rettifilo", "Variante del Rettifilo", SegmentKind::Chicane, 0.00, 0.08, "Tight chicane after start"),
        seg("curva_grande", "Curva Grande", SegmentKind::Corner, 0.08, 0.15, "High-speed right-hander"),
        seg("roggia", "Variante della Roggia", SegmentKind::Chicane, 0.15, 0.22, "Medium-speed chicane"),
        seg("lesmo_1", "Lesmo 1", SegmentKind::Corner, 0.22, 0.28, "Medium-speed right-hander"),
        seg("lesmo_2", "Lesmo 2", SegmentKind::Corner, 0.28, 0.35, "Medium-speed right-hander"),
        seg("serraglio", "Curva del Serraglio", SegmentKind::Straight, 0.35, 0.42, "Flat-out run to Ascari"),
        seg("ascari", "Variante Ascari", SegmentKind::Chicane, 0.42, 0.50, "Fast left-right-left"),
        seg("parabolica", "Curva Parabolica", SegmentKind::Corner, 0.50, 0.58, "Long right-hander onto the straight"),
        seg("main_straight", "Main Straight", SegmentKind::Straight, 0.58, 1.00, "Start/finish straight"),
    ];
    tracks.insert("Monza".to_string(), monza);

    let demo = vec![
        seg("sf_straight", "Start/Finish Straight", SegmentKind::Straight, 0.00, 0.09, "Main straight"),
        seg("t1", "Turn 1", SegmentKind::Corner, 0.09, 0.22, "Slow right-hander"),
        seg("s2_straight", "Back Link", SegmentKind::Straight, 0.22, 0.27, "Short straight"),
        seg("t2", "Turn 2", SegmentKind::Corner, 0.27, 0.37, "Fast left-hander"),
        seg("back_straight", "Back Straight", SegmentKind::Straight, 0.37, 0.49, "Longest straight"),
        seg("t3", "Turn 3", SegmentKind::Chicane, 0.49, 0.60, "Right-left chicane"),
        seg("s4_straight", "Middle Link", SegmentKind::Straight, 0.60, 0.67, "Approach to the sweeper"),
        seg("t4", "Turn 4", SegmentKind::Corner, 0.67, 0.78, "Long sweeping right"),
        seg("t5", "Turn 5", SegmentKind::Corner, 0.78, 0.93, "Tight hairpin left"),
        seg("run_home", "Run to Finish", SegmentKind::Straight, 0.93, 1.00, "Final straight"),
    ];
    tracks.insert("Demo Circuit".to_string(), demo);

    tracks
}

fn seg(
    id: &str,
    name: &str,
    kind: SegmentKind,
    start: f64,
    end: f64,
    description: &str,
) -> TrackSegment {
    TrackSegment {
        id: id.to_string(),
        name: name.to_string(),
        kind,
        start_pct: start,
        end_pct: end,
        description: description.to_string(),
    }
}
