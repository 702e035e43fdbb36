//! Wall-clock stage timings of forward passes.
//!
//! Timings are always recorded. Reports go to the debug log, or to the info
//! log with the `profiling` feature, where `MASKRCNN_PROFILING_WHITELIST`
//! selects the reported passes.

use crate::common::*;
#[cfg(feature = "profiling")]
use dashmap::DashSet;

#[cfg(feature = "profiling")]
lazy_static! {
    static ref PROFILING_CONFIG: ProfilingConfig = {
        match envy::prefixed("MASKRCNN_").from_env() {
            Ok(config) => config,
            Err(err) => {
                warn!(
                    "ignore malformed profiling environment variables: {:?}",
                    err
                );
                ProfilingConfig::default()
            }
        }
    };
    static ref REGISTERED_PASSES: DashSet<&'static str> = DashSet::new();
}

#[cfg(feature = "profiling")]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProfilingConfig {
    /// Pass names to report. All passes are reported when unset.
    pub profiling_whitelist: Option<HashSet<String>>,
}

/// Stage durations of one image, in completion order.
#[derive(Debug, Clone)]
pub struct ImageTiming {
    image_index: usize,
    instant: Instant,
    stages: Vec<(&'static str, Duration)>,
}

impl ImageTiming {
    pub fn start(image_index: usize) -> Self {
        Self {
            image_index,
            instant: Instant::now(),
            stages: vec![],
        }
    }

    pub fn image_index(&self) -> usize {
        self.image_index
    }

    /// Records the time since the previous stage of this image.
    pub fn record(&mut self, stage: &'static str) {
        let now = Instant::now();
        self.stages.push((stage, now - self.instant));
        self.instant = now;
    }

    pub fn stages(&self) -> &[(&'static str, Duration)] {
        &self.stages
    }

    pub fn total(&self) -> Duration {
        self.stages.iter().map(|&(_, elapsed)| elapsed).sum()
    }
}

/// One per-image stage aggregated over a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSummary {
    pub stage: &'static str,
    pub num_images: usize,
    pub total: Duration,
    pub slowest: Duration,
    pub slowest_image: usize,
}

/// Timings of one forward pass over a batch.
#[derive(Debug)]
pub struct PassTiming {
    pass: &'static str,
    instant: Instant,
    shared: Vec<(&'static str, Duration)>,
    images: Vec<ImageTiming>,
}

impl PassTiming {
    pub fn new(pass: &'static str) -> Self {
        #[cfg(feature = "profiling")]
        {
            if REGISTERED_PASSES.insert(pass) {
                info!("registered timing profile '{}'", pass);
            }
        }

        Self {
            pass,
            instant: Instant::now(),
            shared: vec![],
            images: vec![],
        }
    }

    /// Records a batch-wide stage, timed since the previous one.
    pub fn record(&mut self, stage: &'static str) {
        let now = Instant::now();
        self.shared.push((stage, now - self.instant));
        self.instant = now;
    }

    /// Adds per-image timings. They are kept ordered by image index.
    pub fn extend_images<I>(&mut self, images: I)
    where
        I: IntoIterator<Item = ImageTiming>,
    {
        self.images.extend(images);
        self.images.sort_by_key(|timing| timing.image_index);
    }

    pub fn shared(&self) -> &[(&'static str, Duration)] {
        &self.shared
    }

    pub fn images(&self) -> &[ImageTiming] {
        &self.images
    }

    /// Per-image stages summed over the batch, in first-seen order.
    pub fn image_stage_summaries(&self) -> Vec<StageSummary> {
        let mut summaries: Vec<StageSummary> = vec![];

        for timing in &self.images {
            for &(stage, elapsed) in &timing.stages {
                match summaries.iter_mut().find(|summary| summary.stage == stage) {
                    Some(summary) => {
                        summary.num_images += 1;
                        summary.total += elapsed;
                        if elapsed > summary.slowest {
                            summary.slowest = elapsed;
                            summary.slowest_image = timing.image_index;
                        }
                    }
                    None => summaries.push(StageSummary {
                        stage,
                        num_images: 1,
                        total: elapsed,
                        slowest: elapsed,
                        slowest_image: timing.image_index,
                    }),
                }
            }
        }

        summaries
    }

    pub fn report(&self) {
        let lines = || {
            let shared = self
                .shared
                .iter()
                .map(|(stage, elapsed)| format!("- {}\t{:?}", stage, elapsed));
            let per_image = self.image_stage_summaries().into_iter().map(|summary| {
                format!(
                    "- {}\t{:?} over {} images, slowest {:?} on image {}",
                    summary.stage,
                    summary.total,
                    summary.num_images,
                    summary.slowest,
                    summary.slowest_image
                )
            });
            chain(shared, per_image)
        };

        #[cfg(feature = "profiling")]
        {
            let can_report = PROFILING_CONFIG
                .profiling_whitelist
                .as_ref()
                .map(|whitelist| whitelist.contains(self.pass))
                .unwrap_or(true);

            if can_report {
                info!("profiling report for '{}'", self.pass);
                lines().for_each(|line| info!("{}", line));
            }
        }

        #[cfg(not(feature = "profiling"))]
        {
            if log::log_enabled!(log::Level::Debug) {
                debug!("timings of '{}'", self.pass);
                lines().for_each(|line| debug!("{}", line));
            }
        }
    }
}
