//! Scoped-Resource Tracker
//!
//! Lowers a scoped resource block into a guard frame whose finally block runs on
//! every exit: falling through, a propagated fault, a return, or cancellation
//! while suspended inside the body.
//!
//! ```text
//!     $resourceN := <resource>        ; fresh bindings only
//!     enter_guard rN finally Lf
//!     <body>
//!     leave_guard rN
//! Lf:
//!     release $resourceN              ; no-op once the holder is cleared
//!     end_finally
//! ```

use super::lir::Instr;
use super::Lowering;
use crate::error::LoweringError;
use crate::nodes::{Binding, ScopedResourceNode};

pub(crate) fn build(node: &ScopedResourceNode, cx: &mut Lowering) -> Result<(), LoweringError> {
    // The resource is acquired outside its own region: a fault while acquiring
    // leaves nothing to release.
    let holder = match node.binding() {
        Binding::Existing { name } => name.clone(),
        Binding::Fresh { resource } => {
            let value = cx.lower_expr(resource)?;
            let holder = cx.resource_holder();
            cx.declare(&holder);
            cx.emit(Instr::Assign {
                local: holder.clone(),
                value,
            });
            holder
        }
    };

    let finally = cx.fresh_label();
    let region = cx.open_region(holder.clone(), finally);
    if let Some(placeholder) = node.placeholder() {
        cx.bind_placeholder(placeholder, region)?;
    }

    cx.emit(Instr::EnterGuard { region, finally });
    cx.lower_node(node.body())?;
    cx.emit(Instr::LeaveGuard { region });
    cx.place(finally);
    cx.emit(Instr::Release { holder });
    cx.emit(Instr::EndFinally);
    cx.close_region();

    Ok(())
}
