//! Admin command dispatch: opcode decode, the shared "must be unlocked"
//! precondition, and routing to each module's handler (spec.md §4.1).

use crate::async_events::{abort, async_event_request};
use crate::error::StatusCode;
use crate::features::{do_features, FeatureOp};
use crate::firmware::{activate_fw, download_fw, format_nvm};
use crate::host::{BackingStore, HostMemory};
use crate::identify::{get_log_page, identify};
use crate::queue::{create_cq, create_sq, delete_cq, delete_sq};
use crate::security::{security_recv, security_send};
use crate::vendor;
use crate::wire::{Cqe, Opcode, Sqe};
use crate::Controller;

/// Commands that must go through even while the security state machine is
/// locked: `CREATE_CQ` (so a driver can stand up the admin completion path
/// before unlocking), both Security Send/Receive (the only way to transition
/// out of a locked state at all), and `IDENTIFY`/`GET_FEATURES`/`GET_LOG_PAGE`,
/// which carry no such precondition at all — `identify()` enforces its own,
/// narrower lock check on the namespace-identify branch only.
fn allowed_while_locked(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::CreateCq
            | Opcode::SecuritySend
            | Opcode::SecurityRecv
            | Opcode::Identify
            | Opcode::GetFeatures
            | Opcode::GetLogPage
    )
}

fn dispatch_inner<M: HostMemory, B: BackingStore>(
    c: &mut Controller<M, B>,
    sqe: &Sqe,
    cqe: &mut Cqe,
) -> Result<(), StatusCode> {
    let op = Opcode::from_u8(sqe.opcode).ok_or(StatusCode::InvalidOpcode)?;

    if op.is_vendor() && !c.state.cfg.use_aon {
        return Err(StatusCode::InvalidOpcode);
    }
    if !allowed_while_locked(op) && !c.state.security.is_unlocked() {
        return Err(StatusCode::CmdSeqError);
    }

    match op {
        Opcode::DeleteSq => delete_sq(c, sqe),
        Opcode::CreateSq => create_sq(c, sqe),
        Opcode::DeleteCq => delete_cq(c, sqe),
        Opcode::CreateCq => create_cq(c, sqe),
        Opcode::GetLogPage => get_log_page(c, sqe),
        Opcode::Identify => identify(c, sqe),
        Opcode::Abort => abort(c, sqe, cqe),
        Opcode::SetFeatures => do_features(c, sqe, cqe, FeatureOp::Set),
        Opcode::GetFeatures => do_features(c, sqe, cqe, FeatureOp::Get),
        Opcode::AsyncEventRequest => async_event_request(c, sqe),
        Opcode::DownloadFw => download_fw(c, sqe),
        Opcode::ActivateFw => activate_fw(c, sqe),
        Opcode::FormatNvm => format_nvm(c, sqe),
        Opcode::SecuritySend => security_send(c, sqe),
        Opcode::SecurityRecv => security_recv(c, sqe),

        Opcode::CreatePd => vendor::create_pd(c, sqe, cqe),
        Opcode::DeletePd => vendor::delete_pd(c, sqe),
        Opcode::CreateStag => vendor::create_stag(c, sqe, cqe),
        Opcode::DeleteStag => vendor::delete_stag(c, sqe),
        Opcode::CreateNsTag => vendor::create_ns_tag(c, sqe, cqe),
        Opcode::DeleteNsTag => vendor::delete_ns_tag(c, sqe),
        Opcode::CreateNamespace => vendor::create_namespace(c, sqe),
        Opcode::DeleteNamespace => vendor::delete_namespace(c, sqe),
        Opcode::ModifyNamespace => vendor::modify_namespace(c, sqe),
        Opcode::InjectError => vendor::inject_error(c, sqe),
    }
}

/// Processes one decoded admin SQE and returns the completion entry to post.
/// `sqid` is the originating submission queue id, carried into the CQE's
/// `sq_id` field; the caller is responsible for actually writing the
/// returned entry into the target CQ's ring (see `async_events::post_cqe`).
pub fn process_admin<M: HostMemory, B: BackingStore>(
    c: &mut Controller<M, B>,
    sqid: u16,
    sqe: &Sqe,
) -> Cqe {
    let mut cqe = Cqe::new(sqe.cid, sqid);
    match dispatch_inner(c, sqe, &mut cqe) {
        Ok(()) => cqe.set_status(StatusCode::Success),
        Err(code) => {
            log::debug!("admin command opcode={:#04x} cid={} failed: {code}", sqe.opcode, sqe.cid);
            cqe.set_status(code);
        }
    }
    cqe
}
