use std::time::Duration;

/// Round trip of one chunk through the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySample {
    pub sequence: usize,
    pub round_trip: Duration,
    pub bytes_sent: usize,
    pub bytes_received: usize,
}

impl LatencySample {
    pub fn millis(&self) -> f64 {
        self.round_trip.as_secs_f64() * 1000.0
    }

    /// Console line for this chunk, numbered from 1
    pub fn report_line(&self) -> String {
        format!("{} : Processed chunk in {:.2}ms", self.sequence + 1, self.millis())
    }
}

/// Receives one observation per completed round trip
pub trait LatencyObserver: Send {
    fn observe(&mut self, sample: LatencySample);
}

/// Collects every observation and optionally echoes it to stdout
#[derive(Debug, Default)]
pub struct LatencyRecorder {
    samples: Vec<LatencySample>,
    echo: bool,
}

impl LatencyRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorder that also prints each chunk's report line
    pub fn console() -> Self {
        Self {
            samples: Vec::new(),
            echo: true,
        }
    }

    pub fn samples(&self) -> &[LatencySample] {
        &self.samples
    }

    pub fn summary(&self) -> Option<LatencySummary> {
        LatencySummary::from_samples(&self.samples)
    }
}

impl LatencyObserver for LatencyRecorder {
    fn observe(&mut self, sample: LatencySample) {
        if self.echo {
            println!("{}", sample.report_line());
        }
        log::debug!(
            "Chunk {}: sent {} bytes, received {} bytes in {:.2}ms",
            sample.sequence,
            sample.bytes_sent,
            sample.bytes_received,
            sample.millis()
        );
        self.samples.push(sample);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySummary {
    pub count: usize,
    pub min: Duration,
    pub max: Duration,
    pub mean: Duration,
}

impl LatencySummary {
    pub fn from_samples(samples: &[LatencySample]) -> Option<Self> {
        let min = samples.iter().map(|s| s.round_trip).min()?;
        let max = samples.iter().map(|s| s.round_trip).max()?;
        let total: Duration = samples.iter().map(|s| s.round_trip).sum();
        Some(Self {
            count: samples.len(),
            min,
            max,
            mean: total / samples.len() as u32,
        })
    }
}
