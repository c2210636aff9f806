pub mod detect;
pub mod grid;
pub mod header;
pub mod idgen;
pub mod normalizer;
pub mod pipeline;
pub mod registration;

pub use detect::{detect_format, FileFormat};
pub use grid::{parse_grid, ParseError, ParseResult, SourceKind};
pub use header::locate_header;
pub use idgen::IdGenerator;
pub use normalizer::Normalizer;
pub use pipeline::{
    InputFile, PipelineBuilder, PipelineError, PipelineHandle, PipelineState, Progress,
};
