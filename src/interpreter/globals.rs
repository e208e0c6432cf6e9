//! Top-level capability surface injected into every interpreter.
//!
//! The globals registered here are the only effectful names a snippet can
//! reach: the three `request_*` combinators, `classify`, and `chat`. Each
//! combinator builds its capability from the broker configuration, hands
//! it to the snippet's callback, and revokes it on every exit path.
//!
//! Per-execution state (the frozen configuration) travels through
//! `Evaluator::extra`, so the same frozen globals serve every session.

use std::sync::Arc;

use anyhow::anyhow;
use once_cell::sync::Lazy;
use starlark::any::ProvidesStaticType;
use starlark::environment::{Globals, GlobalsBuilder, LibraryExtension};
use starlark::eval::Evaluator;
use starlark::starlark_module;
use starlark::values::list::UnpackList;
use starlark::values::Value;

use super::values::{
    expect_classified, ClassifiedData, ClassifiedValue, FileSystemValue, NetworkValue,
    ProcessPermissionValue,
};
use crate::capability::{new_grant, ChatClient, FileSystem, Network, ProcessPermission};
use crate::classified::transform_active;
use crate::config::SandboxConfig;
use crate::error::SandboxError;

/// Per-execution context reachable from native functions.
#[derive(ProvidesStaticType)]
pub struct EvalContext {
    pub config: Arc<SandboxConfig>,
}

/// The frozen globals shared by every session: the Starlark standard
/// library (with `print` and `json` enabled) plus the capability surface.
pub fn sandbox_globals() -> &'static Globals {
    static GLOBALS: Lazy<Globals> = Lazy::new(|| {
        GlobalsBuilder::extended_by(&[LibraryExtension::Print, LibraryExtension::Json])
            .with(capability_surface)
            .build()
    });
    &GLOBALS
}

fn context_config(eval: &Evaluator) -> anyhow::Result<Arc<SandboxConfig>> {
    let extra = eval
        .extra
        .ok_or_else(|| anyhow!("sandbox context missing"))?;
    let ctx = extra
        .downcast_ref::<EvalContext>()
        .ok_or_else(|| anyhow!("sandbox context has the wrong type"))?;
    Ok(ctx.config.clone())
}

fn deny_inside_transform(what: &str) -> anyhow::Result<()> {
    if transform_active() {
        return Err(SandboxError::security(format!(
            "{what} inside a classified transform"
        ))
        .into());
    }
    Ok(())
}

#[starlark_module]
fn capability_surface(builder: &mut GlobalsBuilder) {
    /// Grant a filesystem capability rooted at `root` for the duration of
    /// the callback; returns the callback's result.
    fn request_filesystem<'v>(
        root: &str,
        f: Value<'v>,
        eval: &mut Evaluator<'v, '_>,
    ) -> anyhow::Result<Value<'v>> {
        deny_inside_transform("capability request")?;
        let config = context_config(eval)?;
        let (state, guard) = new_grant();
        let fs = FileSystem::new(&config, root, state);
        let heap = eval.heap();
        let capability = heap.alloc(FileSystemValue { fs });
        let result = eval
            .eval_function(f, &[capability], &[])
            .map_err(|e| anyhow!(e.to_string()));
        drop(guard);
        result
    }

    /// Grant a process-execution capability for the listed command names.
    fn request_exec_permission<'v>(
        commands: UnpackList<String>,
        f: Value<'v>,
        eval: &mut Evaluator<'v, '_>,
    ) -> anyhow::Result<Value<'v>> {
        deny_inside_transform("capability request")?;
        let config = context_config(eval)?;
        let (state, guard) = new_grant();
        let permission = ProcessPermission::new(commands.items, config.strict, state);
        let heap = eval.heap();
        let capability = heap.alloc(ProcessPermissionValue { permission });
        let result = eval
            .eval_function(f, &[capability], &[])
            .map_err(|e| anyhow!(e.to_string()));
        drop(guard);
        result
    }

    /// Grant a network capability for the listed host names (matched
    /// exactly).
    fn request_network<'v>(
        hosts: UnpackList<String>,
        f: Value<'v>,
        eval: &mut Evaluator<'v, '_>,
    ) -> anyhow::Result<Value<'v>> {
        deny_inside_transform("capability request")?;
        let (state, guard) = new_grant();
        let network = Network::new(hosts.items, state);
        let heap = eval.heap();
        let capability = heap.alloc(NetworkValue { network });
        let result = eval
            .eval_function(f, &[capability], &[])
            .map_err(|e| anyhow!(e.to_string()));
        drop(guard);
        result
    }

    /// Wrap a value as classified. The result renders as
    /// `Classified(***)` and only pure transforms can touch it.
    fn classify<'v>(value: Value<'v>) -> anyhow::Result<ClassifiedValue> {
        Ok(ClassifiedValue::new(ClassifiedData::from_value(value)?))
    }

    /// Submit a message to the configured chat endpoint. Accepts a string
    /// (returns the reply text) or a Classified string (returns a
    /// Classified reply).
    fn chat<'v>(
        message: Value<'v>,
        eval: &mut Evaluator<'v, '_>,
    ) -> anyhow::Result<Value<'v>> {
        deny_inside_transform("chat")?;
        let config = context_config(eval)?;
        let client = ChatClient::new(config.chat.clone());
        let heap = eval.heap();

        if let Some(text) = message.unpack_str() {
            let reply = client.chat(text)?;
            return Ok(heap.alloc(reply));
        }

        let classified = expect_classified(message)
            .map_err(|_| anyhow!("chat accepts a string or a Classified string"))?;
        let payload = classified.inner.clone().map(|data| data.render());
        let reply = client.chat_classified(payload)?;
        Ok(heap.alloc(ClassifiedValue::from_classified(
            reply.map(ClassifiedData::Str),
        )))
    }
}
