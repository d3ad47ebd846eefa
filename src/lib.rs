// shipwright - per-server deployment runner
//
// Compiles a descriptor of enable/order/variable-tagged packages into flat
// command lists, then runs them server by server over SSH.

pub mod compiler;
pub mod executor;
pub mod output;
pub mod parser;

pub use compiler::{compile, CompileError, CompiledTask};
pub use executor::{Engine, EngineConfig, Operation};
pub use output::{DeployError, RunRecap, ServerReport, TerminalOutput};
pub use parser::{load_descriptor_file, Descriptor, Package, Server};
