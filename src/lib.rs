//! ## Quick guide
//!
//! 1. Pick the [`ArchitectureProfile`] of the GPU
//! 2. Create a [`Device`] once, compiling every transfer kernel with your [`Compiler`]
//! 3. Create an [`Encoder`] per job stream, backed by a [`ScratchPool`]
//! 4. Encode copies, fills, updates and dispatches
//! 5. Finish the encoder and submit the head of the closed stream
//!
//! For testing without hardware, [`run::Execution`] walks a closed stream in host memory and
//! runs the kernels that have a host program, such as the indirect dispatch patch.
//!
//! [`ArchitectureProfile`]: profile::ArchitectureProfile
//! [`Device`]: device::Device
//! [`Compiler`]: kernel::Compiler
//! [`Encoder`]: encoder::Encoder
//! [`ScratchPool`]: pool::ScratchPool

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod encoder;
pub mod format;
pub mod job;
pub mod kernel;
pub mod pool;
pub mod profile;
pub mod run;
pub mod shaders;
mod util;

pub use self::device::Device;
pub use self::encoder::{EncodeError, Encoder};
pub use self::pool::{GpuAddress, Pool};
pub use self::profile::ArchitectureProfile;
