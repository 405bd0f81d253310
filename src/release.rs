//! Context release at the exit of a deinit call.
//!
//! The host calls `deinit()` at entry (handled by the synchronizer) and this transition at
//! the true end of deinitialization. Releasing marks the record as between phases and,
//! depending on the module kind, empties the chain's main slot:
//!
//! | Module kind          | Main slot after release                                     |
//! |----------------------|-------------------------------------------------------------|
//! | Indicator, Script    | empty; the instance is in limbo or gone                     |
//! | Expert               | kept for chart, parameter and account changes, else empty   |
//! | Library              | untouched; library slots belong to the synchronizer         |

use crate::{
    context::{ContextRc, ModuleKind, RootFunction},
    registry::ContextRegistry,
    Result,
};

/// Releases `record` and returns true if the chain's main slot was emptied.
///
/// # Errors
/// - [`crate::Error::InvalidParameter`] if the record is unattached, not inside deinit, or
///   of unknown module kind
/// - [`crate::Error::IllegalState`] if a main record is not the chain's current main record
pub fn leave_context(registry: &ContextRegistry, record: &ContextRc) -> Result<bool> {
    let (id, root, module_kind, uninit_reason, name) = {
        let ctx = read_lock!(record);
        (
            ctx.program_id,
            ctx.root_function,
            ctx.module_kind,
            ctx.uninit_reason,
            ctx.module_name.clone(),
        )
    };

    if id.is_unassigned() {
        return Err(invalid_parameter!(
            "invalid execution context (programId = 0, module = {})",
            name
        ));
    }
    if root != Some(RootFunction::Deinit) {
        return Err(invalid_parameter!(
            "invalid execution context (rootFunction = {}, expected {})",
            root.map_or_else(|| "none".to_string(), |r| r.to_string()),
            RootFunction::Deinit
        ));
    }

    match module_kind {
        Some(ModuleKind::Library) => {
            registry.update(record, |ctx| ctx.root_function = None)?;
            Ok(false)
        }

        Some(kind @ (ModuleKind::Indicator | ModuleKind::Script | ModuleKind::Expert)) => {
            let chain = registry.chain(id)?;
            if !chain.is_main(record)? {
                return Err(illegal_state!(
                    "{}::deinit() record is not the stored main record of program {}",
                    name,
                    id
                ));
            }

            registry.update(record, |ctx| ctx.root_function = None)?;

            if kind == ModuleKind::Expert && uninit_reason.keeps_expert_state() {
                return Ok(false);
            }
            chain.clear_main()?;
            Ok(true)
        }

        None => Err(invalid_parameter!(
            "invalid execution context (moduleKind not set, program {})",
            id
        )),
    }
}
