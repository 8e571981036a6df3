use crate::library::catalog::TrackRecord;

/// Post-processing step run over every track that has no stored result for it yet.
///
/// Results are keyed by [`Analyzer::name`], so renaming an analyzer causes every track to be
/// analyzed again. Returning `Ok(None)` leaves the track unanalyzed; it will be offered again on
/// the next pass.
pub trait Analyzer: Send {
    fn name(&self) -> &str;

    fn analyze(&mut self, track: &TrackRecord) -> anyhow::Result<Option<f64>>;
}

/// Average bitrate in kbit/s, from the file size and the probed duration.
#[derive(Debug, Default)]
pub struct BitrateAnalyzer;

impl Analyzer for BitrateAnalyzer {
    fn name(&self) -> &str {
        "bitrate_kbps"
    }

    fn analyze(&mut self, track: &TrackRecord) -> anyhow::Result<Option<f64>> {
        let Some(duration) = track.metadata.duration_secs.filter(|d| *d > 0) else {
            return Ok(None);
        };

        Ok(Some(track.file_size as f64 * 8.0 / duration as f64 / 1000.0))
    }
}
