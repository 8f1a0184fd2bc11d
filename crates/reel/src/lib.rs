pub mod assets;
pub mod cancel;
pub mod capper;
pub mod compose;
pub mod config;
pub mod error;
pub mod ffmpeg;
pub mod ffprobe;
pub mod job;
pub mod mux;
pub mod narration;
pub mod normalize;
pub mod pipeline;
pub mod pool;
pub mod synth;
pub mod topic;
pub mod workspace;

pub use assets::{Asset, AssetKind, AssetSelector, PoolSource, Role, SelectionState};
pub use cancel::Cancellation;
pub use capper::{cap_narration, NarrationAudio};
pub use compose::{build_manifest, SequenceComposer, Slot};
pub use config::{NarrationConfig, ReelConfig};
pub use error::PipelineError;
pub use ffmpeg::{CommandBuilder, EncodingProfile, FFmpegManager};
pub use ffprobe::{FFProbeData, FFProbeFormat, FFProbeStream};
pub use job::{Job, JobStatus, JobTable};
pub use narration::NarrationWriter;
pub use normalize::{ClipNormalizer, Segment};
pub use pipeline::{Pipeline, ReelOutput};
pub use synth::{AudioChunk, ChunkStream, NarrationSynthesizer};
pub use topic::Topic;
pub use workspace::Workspace;
