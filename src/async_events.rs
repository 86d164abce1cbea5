//! ASYNC_EVENT_REQUEST / the deferred delivery callback / ABORT
//! (spec.md §4.6, §5, §6).
//!
//! Async events are delivered LIFO on command id (the most recently
//! submitted `ASYNC_EVENT_REQUEST` is completed first) but FIFO on payload
//! (events are reported in the order they were raised). The two queues are
//! independent and only paired up when both are non-empty.

use crate::controller::{AsyncEventInfo, AsyncEventType, Cq};
use crate::error::{HostError, StatusCode};
use crate::host::{BackingStore, HostMemory};
use crate::wire::{Cqe, Sqe};
use crate::Controller;

/// Writes a completion entry into a CQ's host-memory ring at its current
/// tail and advances the tail, toggling `phase_tag` on wraparound.
pub fn post_cqe<M: HostMemory>(mem: &M, cq: &mut Cq, cqe: &Cqe) -> Result<(), HostError> {
    let mut wire = *cqe;
    wire.set_phase(cq.phase_tag);

    let addr = cq.dma_addr + (cq.tail as u64) * 16;
    let mut buf = [0u8; 16];
    buf[0..4].copy_from_slice(&wire.cmd_specific.to_le_bytes());
    buf[8..10].copy_from_slice(&wire.sq_head.to_le_bytes());
    buf[10..12].copy_from_slice(&wire.sq_id.to_le_bytes());
    buf[12..14].copy_from_slice(&wire.command_id.to_le_bytes());
    buf[14..16].copy_from_slice(&wire.status.to_le_bytes());
    mem.host_write(addr, &buf)?;

    cq.tail += 1;
    if cq.tail >= cq.size {
        cq.tail = 0;
        cq.phase_tag = !cq.phase_tag;
    }
    Ok(())
}

fn encode_async_info(kind: AsyncEventType, info: AsyncEventInfo, log_page: u8) -> u32 {
    let type_bits = match kind {
        AsyncEventType::Error => 0u32,
        AsyncEventType::Smart => 1,
        AsyncEventType::Notice => 2,
        AsyncEventType::IoCmd => 6,
        AsyncEventType::Vendor => 7,
    };
    let info_bits = match info {
        AsyncEventInfo::SmartTempThresh => 0u32,
        AsyncEventInfo::SmartSpareBelowThreshold => 1,
        AsyncEventInfo::Generic(v) => v & 0xFF,
    };
    type_bits | (info_bits << 8) | ((log_page as u32) << 16)
}

/// `ASYNC_EVENT_REQUEST`: records the requesting command id for later
/// completion. Never completed inline — it is only ever consumed by
/// `async_process_cb` once a real event is pending.
pub fn async_event_request<M: HostMemory, B: BackingStore>(
    c: &mut Controller<M, B>,
    sqe: &Sqe,
) -> Result<(), StatusCode> {
    if c.state.outstanding_asyncs > c.state.cfg.aerl as usize {
        return Err(StatusCode::AsyncEventLimitExceeded);
    }
    c.state.async_cid.push(sqe.cid);
    c.state.outstanding_asyncs += 1;
    Ok(())
}

/// Drains one (requester, event) pair if both a waiting `ASYNC_EVENT_REQUEST`
/// and a pending event exist, posting the completion to the admin CQ (qid 0).
/// Returns `true` if a completion was posted.
pub fn async_process_cb<M: HostMemory, B: BackingStore>(
    c: &mut Controller<M, B>,
) -> Result<bool, HostError> {
    if c.state.async_cid.is_empty() || c.state.async_queue.is_empty() {
        return Ok(false);
    }
    let cid = c.state.async_cid.pop().unwrap();
    let event = c.state.async_queue.pop_front().unwrap();
    c.state.outstanding_asyncs = c.state.outstanding_asyncs.saturating_sub(1);

    let mut cqe = Cqe::new(cid, 0);
    cqe.cmd_specific = encode_async_info(event.kind, event.info, event.log_page);
    cqe.set_status(StatusCode::Success);

    let mut admin_cq = std::mem::take(&mut c.state.cqs[0]);
    let result = post_cqe(&c.mem, &mut admin_cq, &cqe);
    c.state.cqs[0] = admin_cq;
    result?;
    Ok(true)
}

/// `ABORT`: cdw10 carries the target `{sqid:16, cid:16}`. If the command is
/// still sitting in that SQ's outstanding-command list it is removed and a
/// synthetic completion (status `ABORT_REQ`) is posted to that SQ's CQ; on
/// no match `ABORT` itself fails with `REQ_CMD_TO_ABORT_NOT_FOUND`.
pub fn abort<M: HostMemory, B: BackingStore>(
    c: &mut Controller<M, B>,
    sqe: &Sqe,
    cqe: &mut Cqe,
) -> Result<(), StatusCode> {
    let target_sqid = (sqe.cdw10 & 0xFFFF) as u16;
    let target_cid = (sqe.cdw10 >> 16) as u16;

    if target_sqid as usize >= c.state.sqs.len() || !c.state.sqs[target_sqid as usize].allocated {
        return Err(StatusCode::ReqCmdToAbortNotFound);
    }

    let pos = c.state.sqs[target_sqid as usize]
        .cmd_list
        .iter()
        .position(|&(cid, _)| cid == target_cid);

    let Some(pos) = pos else {
        return Err(StatusCode::ReqCmdToAbortNotFound);
    };

    c.state.sqs[target_sqid as usize].cmd_list.remove(pos);
    let cq_id = c.state.sqs[target_sqid as usize].cq_id;

    let mut abort_cqe = Cqe::new(target_cid, target_sqid);
    abort_cqe.set_status(StatusCode::AbortReq);

    let mut target_cq = std::mem::take(&mut c.state.cqs[cq_id as usize]);
    post_cqe(&c.mem, &mut target_cq, &abort_cqe).map_err(|_| StatusCode::Internal)?;
    c.state.cqs[cq_id as usize] = target_cq;

    cqe.cmd_specific = 0;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{AsyncEventInfo, AsyncEventType, PendingAsyncEvent};
    use crate::test_support::test_controller;

    fn make_cq<M: HostMemory, B: BackingStore>(c: &mut Controller<M, B>, id: u16, dma_addr: u64) {
        c.state.cqs[id as usize] = Cq {
            allocated: true,
            id,
            head: 0,
            tail: 0,
            size: 16,
            dma_addr,
            phys_contig: true,
            irq_enabled: false,
            vector: 0,
            phase_tag: true,
            usage_cnt: 1,
            pdid: 0,
        };
    }

    #[test]
    fn async_request_then_pending_event_drains() {
        let mut c = test_controller();
        make_cq(&mut c, 0, 0x1000);

        let mut sqe = Sqe::default();
        sqe.cid = 42;
        async_event_request(&mut c, &sqe).unwrap();
        assert_eq!(c.state.outstanding_asyncs, 1);

        c.state.async_queue.push_back(PendingAsyncEvent {
            kind: AsyncEventType::Smart,
            info: AsyncEventInfo::SmartTempThresh,
            log_page: crate::identify::LOG_SMART_INFORMATION,
        });

        let drained = async_process_cb(&mut c).unwrap();
        assert!(drained);
        assert_eq!(c.state.outstanding_asyncs, 0);

        use crate::host::HostMemory as _;
        let mut buf = [0u8; 16];
        c.mem.host_read(0x1000, &mut buf).unwrap();
        let cid = u16::from_le_bytes(buf[12..14].try_into().unwrap());
        assert_eq!(cid, 42);
    }

    #[test]
    fn async_event_limit_exceeded() {
        let mut c = test_controller();
        c.state.outstanding_asyncs = c.state.cfg.aerl as usize + 1;
        let sqe = Sqe::default();
        assert_eq!(
            async_event_request(&mut c, &sqe).unwrap_err(),
            StatusCode::AsyncEventLimitExceeded
        );
    }

    #[test]
    fn abort_removes_command_and_posts_completion() {
        let mut c = test_controller();
        make_cq(&mut c, 0, 0x2000);
        c.state.sqs[0].allocated = true;
        c.state.sqs[0].cq_id = 0;
        c.state.sqs[0].cmd_list.push((7, 0x01));

        let mut sqe = Sqe::default();
        sqe.cdw10 = 0 | (7u32 << 16); // sqid=0, cid=7
        let mut cqe = Cqe::default();
        abort(&mut c, &sqe, &mut cqe).unwrap();

        assert_eq!(cqe.cmd_specific, 0);
        assert!(c.state.sqs[0].cmd_list.is_empty());
    }

    #[test]
    fn abort_not_found_fails_with_req_cmd_to_abort_not_found() {
        let mut c = test_controller();
        make_cq(&mut c, 0, 0x2000);
        c.state.sqs[0].allocated = true;
        c.state.sqs[0].cq_id = 0;

        let mut sqe = Sqe::default();
        sqe.cdw10 = 0 | (7u32 << 16);
        let mut cqe = Cqe::default();
        assert_eq!(
            abort(&mut c, &sqe, &mut cqe).unwrap_err(),
            StatusCode::ReqCmdToAbortNotFound
        );
    }
}
