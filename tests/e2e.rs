//! End-to-end scenarios exercised through `process_admin`, the same entry
//! point a PCIe front-end would call per decoded SQE.

use nvme_adm::config::AdmConfig;
use nvme_adm::controller::{Cq, SecurityState};
use nvme_adm::host::{FlatHostMemory, HostMemory, MemBackingStore};
use nvme_adm::process_admin;
use nvme_adm::wire::{Cqe, Sqe};
use nvme_adm::Controller;

fn new_controller() -> Controller<FlatHostMemory, MemBackingStore> {
    Controller::new(
        AdmConfig::default(),
        64 * 1024 * 1024,
        FlatHostMemory::new(1024 * 1024),
        MemBackingStore::default(),
    )
}

fn sc_sct(cqe: &Cqe) -> (u16, u16) {
    ((cqe.status >> 1) & 0xFF, (cqe.status >> 9) & 0x7)
}

fn is_success(cqe: &Cqe) -> bool {
    sc_sct(cqe) == (0, 0)
}

fn make_sqe(opcode: u8) -> Sqe {
    Sqe {
        opcode,
        ..Default::default()
    }
}

/// 1. CREATE_CQ(qid=1)/CREATE_SQ(qid=1, cqid=1) both succeed, CQ[1].usage_cnt == 1.
#[test]
fn scenario_1_create_cq_then_sq_bumps_usage_count() {
    let mut c = new_controller();

    let mut create_cq = make_sqe(0x05);
    create_cq.cdw10 = 1 | (63 << 16);
    create_cq.cdw11 = 0x1;
    create_cq.prp1 = 0x1000;
    assert!(is_success(&process_admin(&mut c, 0, &create_cq)));

    let mut create_sq = make_sqe(0x01);
    create_sq.cdw10 = 1 | (63 << 16);
    create_sq.cdw11 = 0x1 | (1u32 << 16);
    create_sq.prp1 = 0x2000;
    assert!(is_success(&process_admin(&mut c, 0, &create_sq)));

    assert_eq!(c.state.cqs[1].usage_cnt, 1);
}

/// 2. DELETE_CQ right after scenario 1 fails with INVALID_FIELD; after
/// DELETE_SQ, DELETE_CQ succeeds.
#[test]
fn scenario_2_delete_cq_blocked_while_sq_attached() {
    let mut c = new_controller();
    let mut create_cq = make_sqe(0x05);
    create_cq.cdw10 = 1 | (63 << 16);
    create_cq.cdw11 = 0x1;
    create_cq.prp1 = 0x1000;
    process_admin(&mut c, 0, &create_cq);

    let mut create_sq = make_sqe(0x01);
    create_sq.cdw10 = 1 | (63 << 16);
    create_sq.cdw11 = 0x1 | (1u32 << 16);
    create_sq.prp1 = 0x2000;
    process_admin(&mut c, 0, &create_sq);

    let mut delete_cq = make_sqe(0x04);
    delete_cq.cdw10 = 1;
    let cqe = process_admin(&mut c, 0, &delete_cq);
    assert_eq!(sc_sct(&cqe).0, 0x02); // INVALID_FIELD value from wire.rs

    let mut delete_sq = make_sqe(0x00);
    delete_sq.cdw10 = 1;
    assert!(is_success(&process_admin(&mut c, 0, &delete_sq)));
    assert!(is_success(&process_admin(&mut c, 0, &delete_cq)));
}

/// 3. CREATE_CQ with qsize = MQES+1 fails with MAX_QUEUE_SIZE_EXCEEDED.
#[test]
fn scenario_3_oversized_queue_rejected() {
    let mut c = new_controller();
    let mut sqe = make_sqe(0x05);
    sqe.cdw10 = 1 | (4096u32 << 16);
    sqe.cdw11 = 0x1;
    sqe.prp1 = 0x1000;
    let cqe = process_admin(&mut c, 0, &sqe);
    assert_eq!(sc_sct(&cqe).0, 0x02); // MAX_QUEUE_SIZE_EXCEEDED value from wire.rs
}

/// 4. SET_FEATURES(TEMPERATURE_THRESHOLD, 300) with temperature=320 enqueues
/// an async event; a subsequent ASYNC_EV_REQ completes with the pending
/// SMART/temp-threshold event.
#[test]
fn scenario_4_temperature_crossing_drains_through_async_request() {
    let mut c = new_controller();
    c.state.temperature = 320;
    c.state.cqs[0] = Cq {
        allocated: true,
        id: 0,
        head: 0,
        tail: 0,
        size: 16,
        dma_addr: 0x4000,
        phys_contig: true,
        irq_enabled: true,
        vector: 0,
        phase_tag: true,
        usage_cnt: 0,
        pdid: 0,
    };

    let mut set_features = make_sqe(0x09);
    set_features.cdw10 = 0x04; // TEMPERATURE_THRESHOLD
    set_features.cdw11 = 300;
    assert!(is_success(&process_admin(&mut c, 0, &set_features)));
    assert_eq!(c.state.async_queue.len(), 1);

    let mut async_req = make_sqe(0x0C);
    async_req.cid = 99;
    assert!(is_success(&process_admin(&mut c, 0, &async_req)));

    let drained = nvme_adm::async_events::async_process_cb(&mut c).unwrap();
    assert!(drained);

    let mut buf = [0u8; 16];
    c.mem.host_read(0x4000, &mut buf).unwrap();
    let cid = u16::from_le_bytes(buf[12..14].try_into().unwrap());
    assert_eq!(cid, 99);

    let info = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    assert_eq!(info & 0xFF, 1); // AsyncEventType::Smart
    assert_eq!((info >> 8) & 0xFF, 0); // AsyncEventInfo::SmartTempThresh
}

/// 5. SET_PASSWORD (B->H), FREEZE_LOCK (H->E1), IDENTIFY fails with
/// CMD_SEQ_ERROR while locked, ERASE_PREP in E1 fails and reverts E1->H.
#[test]
fn scenario_5_security_transitions_and_locked_identify() {
    let mut c = new_controller();
    c.state.allocate_disk(1, 1024, 512, 0, 0, 0);

    let mut payload = vec![0u8; 4096];
    payload[0..2].copy_from_slice(&1u16.to_le_bytes()); // OP_SET_PASSWORD
    payload[2..2 + 7].copy_from_slice(b"hunter2");
    c.mem.host_write(0x5000, &payload).unwrap();
    let mut set_password = make_sqe(0x81); // SecuritySend
    set_password.prp1 = 0x5000;
    assert!(is_success(&process_admin(&mut c, 0, &set_password)));
    assert_eq!(c.state.security, SecurityState::H);

    let mut freeze = vec![0u8; 4096];
    freeze[0..2].copy_from_slice(&5u16.to_le_bytes()); // OP_FREEZE_LOCK
    c.mem.host_write(0x5000, &freeze).unwrap();
    assert!(is_success(&process_admin(&mut c, 0, &set_password)));
    assert_eq!(c.state.security, SecurityState::E1);

    let mut identify = make_sqe(0x06);
    identify.cdw10 = 0; // CNS_NAMESPACE
    identify.nsid = 1;
    identify.prp1 = 0x7000;
    let cqe = process_admin(&mut c, 0, &identify);
    assert_eq!(sc_sct(&cqe), (0x0C, 0)); // CmdSeqError, generic class

    // Controller-identify is not subject to the same lock: it still succeeds.
    let mut id_ctrl = make_sqe(0x06);
    id_ctrl.cdw10 = 1; // CNS_CONTROLLER
    id_ctrl.prp1 = 0x7000;
    assert!(is_success(&process_admin(&mut c, 0, &id_ctrl)));

    let mut erase_prep = vec![0u8; 4096];
    erase_prep[0..2].copy_from_slice(&3u16.to_le_bytes()); // OP_ERASE_PREP (only valid from H)
    c.mem.host_write(0x5000, &erase_prep).unwrap();
    let cqe = process_admin(&mut c, 0, &set_password);
    assert!(!is_success(&cqe));
    assert_eq!(c.state.security, SecurityState::H);
}

/// 6. Three UNLOCK attempts with the wrong password in state D: the third
/// reports CMD_SEQ_ERROR and leaves the controller in state G.
#[test]
fn scenario_6_unlock_lockout_after_max_retries() {
    let mut c = new_controller();
    c.state.security = SecurityState::D;
    c.state.password[..7].copy_from_slice(b"correct");

    let mut payload = vec![0u8; 4096];
    payload[0..2].copy_from_slice(&2u16.to_le_bytes()); // OP_UNLOCK
    payload[2..2 + 5].copy_from_slice(b"wrong");
    c.mem.host_write(0x6000, &payload).unwrap();
    let mut unlock = make_sqe(0x81);
    unlock.prp1 = 0x6000;

    for _ in 0..c.state.cfg.max_password_retry - 1 {
        assert!(!is_success(&process_admin(&mut c, 0, &unlock)));
    }
    assert_eq!(c.state.security, SecurityState::D);

    let cqe = process_admin(&mut c, 0, &unlock);
    assert!(!is_success(&cqe));
    assert_eq!(c.state.security, SecurityState::G);
}

/// 7. ABORT of a queued command succeeds and posts a synthetic CQE with
/// ABORT_REQ status whose phase bit matches the target CQ's phase tag.
#[test]
fn scenario_7_abort_posts_synthetic_completion_with_matching_phase() {
    let mut c = new_controller();
    c.state.cqs[1] = Cq {
        allocated: true,
        id: 1,
        head: 0,
        tail: 0,
        size: 16,
        dma_addr: 0x7000,
        phys_contig: true,
        irq_enabled: true,
        vector: 0,
        phase_tag: true,
        usage_cnt: 1,
        pdid: 0,
    };
    c.state.sqs[1].allocated = true;
    c.state.sqs[1].cq_id = 1;
    c.state.sqs[1].cmd_list.push((7, 0x01));

    let mut abort = make_sqe(0x08);
    abort.cdw10 = 1 | (7u32 << 16); // sqid=1, cid=7
    let cqe = process_admin(&mut c, 0, &abort);
    assert!(is_success(&cqe));
    assert_eq!(cqe.cmd_specific, 0);
    assert!(c.state.sqs[1].cmd_list.is_empty());

    let mut buf = [0u8; 16];
    c.mem.host_read(0x7000, &mut buf).unwrap();
    let status = u16::from_le_bytes(buf[14..16].try_into().unwrap());
    assert!(status & 0x8000 != 0); // phase bit set, matching CQ.phase_tag before the post
}
