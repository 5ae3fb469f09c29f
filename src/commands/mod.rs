// Stack lifecycle
pub mod apply;
pub mod plan;

// Inspection
pub mod graph;
pub mod outputs;
pub mod state;

use crate::Context;
use crate::config::Stack;
use anyhow::Result;

/// Load the stack file named on the command line
fn load_stack(ctx: &Context) -> Result<Stack> {
    Stack::load(&ctx.file)
}
