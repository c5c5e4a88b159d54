use cmbus_frame::{Envelope, MessageType};
use tracing::debug;

use crate::context::PluginContext;
use crate::error::Result;

/// A handler attached to the broker.
///
/// Every callback is optional. The broker calls `init` before the plugin's
/// thread starts and `fini` on that thread once shutdown begins; the rest run
/// on the plugin's own thread:
/// - `receive` for each envelope, classified by the channel it arrived on
/// - `timeout` when the context timeout expires with nothing received
/// - `poll` after every iteration, message or timeout
///
/// Errors from callbacks other than `init` are logged and do not stop the
/// plugin.
pub trait Plugin: Send {
    fn init(&mut self, _ctx: &mut PluginContext) -> Result<()> {
        Ok(())
    }

    fn fini(&mut self, _ctx: &mut PluginContext) -> Result<()> {
        Ok(())
    }

    fn timeout(&mut self, _ctx: &mut PluginContext) -> Result<()> {
        Ok(())
    }

    /// Handle one envelope. The plugin owns it from here on.
    fn receive(
        &mut self,
        ctx: &mut PluginContext,
        envelope: Envelope,
        kind: MessageType,
    ) -> Result<()> {
        debug!(
            plugin = ctx.name(),
            %kind,
            frames = envelope.len(),
            "no receive callback, dropping envelope"
        );
        Ok(())
    }

    fn poll(&mut self, _ctx: &mut PluginContext) -> Result<()> {
        Ok(())
    }
}
