//! Plugins compiled into the `cmbus` binary.

use std::time::Duration;

use cmbus_frame::{Envelope, EnvelopeSink, MessageType};
use cmbus_plugin::{
    Outbound, Plugin, PluginContext, PluginDescriptor, PluginError, PluginRegistry, Result,
};
use serde_json::json;
use tracing::debug;

const DEFAULT_HEARTBEAT_PERIOD: Duration = Duration::from_secs(1);

pub fn registry() -> Result<PluginRegistry> {
    PluginRegistry::new()
        .with(PluginDescriptor::new("echo", || Box::new(Echo)))?
        .with(PluginDescriptor::new("hb", || Box::<Heartbeat>::default()))
}

/// Answers every request with the envelope it received.
struct Echo;

impl Plugin for Echo {
    fn receive(
        &mut self,
        ctx: &mut PluginContext,
        envelope: Envelope,
        kind: MessageType,
    ) -> Result<()> {
        match kind {
            MessageType::Request => ctx.respond(envelope),
            _ => Ok(()),
        }
    }
}

/// Publishes an `hb` event every period and answers `hb.get` with the epoch.
#[derive(Default)]
struct Heartbeat {
    epoch: u64,
}

impl Plugin for Heartbeat {
    fn init(&mut self, ctx: &mut PluginContext) -> Result<()> {
        let period = match ctx.settings().and_then(|s| s.get("period_ms")) {
            Some(value) => value
                .as_u64()
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .ok_or_else(|| PluginError::callback("period_ms must be a positive integer"))?,
            None => DEFAULT_HEARTBEAT_PERIOD,
        };
        ctx.set_timeout(Some(period));
        Ok(())
    }

    fn timeout(&mut self, ctx: &mut PluginContext) -> Result<()> {
        self.epoch += 1;
        let node = ctx.server().node();
        ctx.outbound(Outbound::Event).send_formatted(
            Some(&json!({"epoch": self.epoch, "node": node})),
            None,
            format_args!("hb"),
        )?;
        Ok(())
    }

    fn receive(
        &mut self,
        ctx: &mut PluginContext,
        mut envelope: Envelope,
        kind: MessageType,
    ) -> Result<()> {
        if kind != MessageType::Request {
            return Ok(());
        }
        if !envelope.matches_tag("hb.get")? {
            debug!(tag = envelope.tag().unwrap_or("?"), "unsupported heartbeat request");
            envelope.nak_request(kind)?;
            return ctx.respond(envelope);
        }
        envelope.set_json(&json!({"epoch": self.epoch}))?;
        ctx.respond(envelope)
    }
}
