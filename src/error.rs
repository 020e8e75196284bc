//! Error types for technique construction, device setup, and pipeline
//! assembly.

use std::fmt;

use crate::technique::ShaderStage;

/// Errors produced while turning shader source into a usable technique.
///
/// All variants carry the toolchain's diagnostic text verbatim. Compilation
/// and validation are tied to a specific stage; linking covers entry-point
/// lookup and pipeline assembly for the technique as a whole.
#[derive(Debug)]
pub enum ShaderError {
    /// Source text failed to parse.
    Compile { stage: ShaderStage, log: String },
    /// Source parsed but the module failed validation.
    Validate { stage: ShaderStage, log: String },
    /// Entry-point lookup or pipeline assembly failed.
    Link { label: String, log: String },
}

impl fmt::Display for ShaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderError::Compile { stage, log } => {
                write!(f, "Failed to compile {} shader: {}", stage, log)
            }
            ShaderError::Validate { stage, log } => {
                write!(f, "Invalid {} shader: {}", stage, log)
            }
            ShaderError::Link { label, log } => {
                write!(f, "Failed to link technique '{}': {}", label, log)
            }
        }
    }
}

impl std::error::Error for ShaderError {}

/// Errors from device acquisition and buffer readback.
///
/// Device errors reported outside these construction paths are considered
/// unrecoverable: buffer contents are undefined afterwards, so the context
/// installs a handler that logs them and aborts the process.
#[derive(Debug)]
pub enum DeviceError {
    /// No suitable GPU adapter found
    NoAdapter,
    /// Failed to create device
    RequestDevice(wgpu::RequestDeviceError),
    /// Failed to map buffer memory for readback
    BufferMap(String),
    /// The device reported an error inside a checked scope
    Reported { context: String, message: String },
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::NoAdapter => write!(f, "No suitable GPU adapter found"),
            DeviceError::RequestDevice(e) => write!(f, "Failed to create device: {}", e),
            DeviceError::BufferMap(e) => write!(f, "Failed to map GPU buffer: {}", e),
            DeviceError::Reported { context, message } => {
                write!(f, "Device error during {}: {}", context, message)
            }
        }
    }
}

impl std::error::Error for DeviceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DeviceError::RequestDevice(e) => Some(e),
            _ => None,
        }
    }
}

impl From<wgpu::RequestDeviceError> for DeviceError {
    fn from(err: wgpu::RequestDeviceError) -> Self {
        DeviceError::RequestDevice(err)
    }
}

/// Errors from assembling techniques and pipelines with incompatible pieces.
#[derive(Debug)]
pub enum ConfigurationError {
    /// Capture varyings did not name every particle field in record order
    CaptureVaryings { expected: String, found: String },
    /// More than one capture stage in a pipeline
    MultipleCaptureStages,
    /// Capture and compute stages mixed in one update sequence
    MixedUpdateStages,
    /// A capture kernel never writes the capture destination
    MissingCaptureWrite { label: String },
    /// A technique declared a resource outside the binding conventions
    UnsupportedBinding { group: u32, binding: u32 },
    /// A uniform member uses a type the uniform table cannot stage
    UnsupportedUniformMember { name: String },
    /// A technique declared more than one uniform block
    MultipleUniformBlocks,
    /// Neighbor capacity of zero
    ZeroNeighborCapacity,
    /// Readback range not 4-byte aligned
    UnalignedReadback { offset: u64, size: u64 },
    /// Readback range extends past the end of the buffer
    ReadbackOutOfBounds { end: u64, size: u64 },
    /// An update stage reads the neighbor index but the pipeline was built
    /// without one
    MissingNeighborIndex { stage: String },
    /// A step writes a resource that a later step touches with no barrier
    /// in between
    MissingBarrier { resource: &'static str, writer: String, reader: String },
    /// A technique of the wrong kind was supplied for a pipeline slot
    WrongKind { label: String, expected: &'static str },
    /// Capture destination too small for the particle count
    CaptureSize { required: u64, actual: u64 },
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::CaptureVaryings { expected, found } => write!(
                f,
                "Capture varyings must name every particle field in record order (expected [{}], found [{}])",
                expected, found
            ),
            ConfigurationError::MultipleCaptureStages => {
                write!(f, "A pipeline can hold at most one capture stage")
            }
            ConfigurationError::MixedUpdateStages => {
                write!(f, "Capture and compute update stages cannot be mixed in one pipeline")
            }
            ConfigurationError::MissingCaptureWrite { label } => write!(
                f,
                "Capture technique '{}' never writes the capture destination at group 1 binding 0",
                label
            ),
            ConfigurationError::UnsupportedBinding { group, binding } => write!(
                f,
                "Unsupported resource binding at group {} binding {}",
                group, binding
            ),
            ConfigurationError::UnsupportedUniformMember { name } => {
                write!(f, "Unsupported uniform member type for '{}'", name)
            }
            ConfigurationError::MultipleUniformBlocks => {
                write!(f, "A technique can declare at most one uniform block")
            }
            ConfigurationError::ZeroNeighborCapacity => {
                write!(f, "Neighbor capacity must be at least 1")
            }
            ConfigurationError::UnalignedReadback { offset, size } => write!(
                f,
                "Readback range must be 4-byte aligned (offset {}, size {})",
                offset, size
            ),
            ConfigurationError::ReadbackOutOfBounds { end, size } => write!(
                f,
                "Readback range ends at byte {} but the buffer holds {}",
                end, size
            ),
            ConfigurationError::MissingNeighborIndex { stage } => write!(
                f,
                "Stage '{}' uses the neighbor index but the pipeline has none",
                stage
            ),
            ConfigurationError::MissingBarrier { resource, writer, reader } => write!(
                f,
                "Missing barrier between '{}' writing {} and '{}'",
                writer, resource, reader
            ),
            ConfigurationError::WrongKind { label, expected } => write!(
                f,
                "Technique '{}' cannot be used here (expected a {} technique)",
                label, expected
            ),
            ConfigurationError::CaptureSize { required, actual } => write!(
                f,
                "Capture destination is {} bytes but {} are required",
                actual, required
            ),
        }
    }
}

impl std::error::Error for ConfigurationError {}

/// Top-level error type for the crate
#[derive(Debug)]
pub enum Error {
    /// Shader compilation, validation, or linking failed
    Shader(ShaderError),
    /// Device acquisition or readback failed
    Device(DeviceError),
    /// Incompatible pieces were assembled
    Configuration(ConfigurationError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Shader(e) => write!(f, "Shader error: {}", e),
            Error::Device(e) => write!(f, "Device error: {}", e),
            Error::Configuration(e) => write!(f, "Configuration error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Shader(e) => Some(e),
            Error::Device(e) => Some(e),
            Error::Configuration(e) => Some(e),
        }
    }
}

impl From<ShaderError> for Error {
    fn from(err: ShaderError) -> Self {
        Error::Shader(err)
    }
}

impl From<DeviceError> for Error {
    fn from(err: DeviceError) -> Self {
        Error::Device(err)
    }
}

impl From<ConfigurationError> for Error {
    fn from(err: ConfigurationError) -> Self {
        Error::Configuration(err)
    }
}
