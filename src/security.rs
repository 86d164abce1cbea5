//! ATA/NVMe-style security state machine driven by `SECURITY_SEND`/`SECURITY_RECV`
//! (spec.md §4.4). Security Send carries a 4096-byte payload whose first two
//! bytes (little-endian) select the sub-operation.

use crate::controller::{SecurityState, PASSWORD_LEN};
use crate::error::StatusCode;
use crate::host::{host_read_prp, host_write_prp, BackingStore, HostMemory};
use crate::wire::Sqe;
use crate::Controller;

const PROTOCOL_AON: u32 = 0xEF;
const PROTOCOL_SUPPORTED: u32 = 0x00;

const OP_SET_PASSWORD: u16 = 0x01;
const OP_UNLOCK: u16 = 0x02;
const OP_ERASE_PREP: u16 = 0x03;
const OP_ERASE_UNIT: u16 = 0x04;
const OP_FREEZE_LOCK: u16 = 0x05;
const OP_DISABLE_PASSWORD: u16 = 0x06;

fn protocol_and_sps(sqe: &Sqe) -> (u32, u32) {
    // cdw10: {rsvd:8, sps:16, spsp:8}... wire-layout details are left to the
    // embedding front-end; this controller only distinguishes protocol and
    // sps, both zero for every transition this spec defines.
    (sqe.cdw10 & 0xFF, sqe.cdw11 & 0xFFFF)
}

pub fn security_send<M: HostMemory, B: BackingStore>(
    c: &mut Controller<M, B>,
    sqe: &Sqe,
) -> Result<(), StatusCode> {
    let (protocol, sps) = protocol_and_sps(sqe);
    if protocol != PROTOCOL_AON || sps != 0 {
        return Err(StatusCode::InvalidField);
    }

    let mut payload = vec![0u8; 4096];
    host_read_prp(&c.mem, sqe.prp1, sqe.prp2, c.state.cfg.page_size as u64, &mut payload)
        .map_err(|_| StatusCode::DataXferError)?;

    let op = u16::from_le_bytes([payload[0], payload[1]]);
    let state = c.state.security;

    let result = match (state, op) {
        (SecurityState::B, OP_SET_PASSWORD) => {
            c.state.password.copy_from_slice(&payload[2..2 + PASSWORD_LEN]);
            c.state.security = SecurityState::H;
            Ok(())
        }
        (SecurityState::D, OP_UNLOCK) => {
            // The full-buffer comparison this implements is the corrected
            // form of the original source's operator-precedence bug
            // (`memcmp(a, b, sizeof(password) != 0)`, spec.md §9), which
            // collapsed the comparison length to a single byte.
            if payload[2..2 + PASSWORD_LEN] == c.state.password[..] {
                c.state.security = SecurityState::H;
                c.state.password_retry = 0;
                Ok(())
            } else {
                c.state.password_retry += 1;
                if c.state.password_retry >= c.state.cfg.max_password_retry {
                    c.state.security = SecurityState::G;
                }
                Err(())
            }
        }
        (SecurityState::H, OP_ERASE_PREP) => {
            c.state.security = SecurityState::E1;
            Ok(())
        }
        (SecurityState::E1, OP_ERASE_UNIT) => {
            if payload[2..2 + PASSWORD_LEN] == c.state.password[..] {
                for disk in c.state.disks.iter_mut().flatten() {
                    disk.ns_util.iter_mut().for_each(|b| *b = false);
                    disk.has_meta_mapping = false;
                    disk.thresh_warn_issued = false;
                }
                c.state.security = SecurityState::B;
                Ok(())
            } else {
                // ERASE_UNIT stays in E1 on mismatch, unlike every other op.
                return Err(StatusCode::CmdSeqError);
            }
        }
        (SecurityState::H, OP_FREEZE_LOCK) => {
            c.state.security = SecurityState::E1;
            Ok(())
        }
        (SecurityState::H, OP_DISABLE_PASSWORD) => {
            if payload[2..2 + PASSWORD_LEN] == c.state.password[..] {
                c.state.security = SecurityState::B;
                Ok(())
            } else {
                Err(())
            }
        }
        _ => Err(()),
    };

    let is_known_op = matches!(
        op,
        OP_SET_PASSWORD
            | OP_UNLOCK
            | OP_ERASE_PREP
            | OP_ERASE_UNIT
            | OP_FREEZE_LOCK
            | OP_DISABLE_PASSWORD
    );

    match result {
        Ok(()) => Ok(()),
        Err(()) => {
            // Any failing op in state E1 reverts to H, except ERASE_UNIT
            // (handled above by returning early).
            if c.state.security == SecurityState::E1 {
                c.state.security = SecurityState::H;
            }
            if is_known_op {
                Err(StatusCode::CmdSeqError)
            } else {
                Err(StatusCode::InvalidField)
            }
        }
    }
}

pub fn security_recv<M: HostMemory, B: BackingStore>(
    c: &mut Controller<M, B>,
    sqe: &Sqe,
) -> Result<(), StatusCode> {
    let (protocol, sps) = protocol_and_sps(sqe);
    if protocol != PROTOCOL_SUPPORTED || sps != 0 {
        return Err(StatusCode::InvalidField);
    }

    // Supported Security Protocols descriptor: {0x00, 0xEF}.
    let mut payload = vec![0u8; 4096];
    payload[0] = 0x00;
    payload[1] = PROTOCOL_AON as u8;

    host_write_prp(&c.mem, sqe.prp1, sqe.prp2, c.state.cfg.page_size as u64, &payload)
        .map_err(|_| StatusCode::DataXferError)
}

#[cfg(test)]
mod tests {
    use crate::test_support::test_controller;
    use crate::wire::Sqe;

    fn send(c: &mut crate::test_support::TestController, op: u16, password: &[u8]) -> Result<(), crate::error::StatusCode> {
        let mut payload = vec![0u8; 4096];
        payload[0..2].copy_from_slice(&op.to_le_bytes());
        payload[2..2 + password.len().min(32)].copy_from_slice(&password[..password.len().min(32)]);
        c.mem.host_write(0x5000, &payload).unwrap();
        let mut sqe = Sqe::default();
        sqe.prp1 = 0x5000;
        super::security_send(c, &sqe)
    }

    #[test]
    fn set_password_then_unlock() {
        use crate::host::HostMemory;
        let mut c = test_controller();
        send(&mut c, super::OP_SET_PASSWORD, b"hunter2").unwrap();
        assert_eq!(c.state.security, crate::controller::SecurityState::H);

        send(&mut c, super::OP_FREEZE_LOCK, b"").unwrap();
        assert_eq!(c.state.security, crate::controller::SecurityState::E1);

        // ERASE_PREP while in E1 is not a valid op (only valid from H) -> fails, reverts to H.
        assert!(send(&mut c, super::OP_ERASE_PREP, b"").is_err());
        assert_eq!(c.state.security, crate::controller::SecurityState::H);
    }

    #[test]
    fn unlock_lockout_after_max_retries() {
        use crate::host::HostMemory;
        let mut c = test_controller();
        c.state.security = crate::controller::SecurityState::D;
        c.state.password[..7].copy_from_slice(b"correct");

        for _ in 0..c.state.cfg.max_password_retry - 1 {
            assert!(send(&mut c, super::OP_UNLOCK, b"wrongpw").is_err());
        }
        assert_eq!(c.state.security, crate::controller::SecurityState::D);
        assert!(send(&mut c, super::OP_UNLOCK, b"wrongpw").is_err());
        assert_eq!(c.state.security, crate::controller::SecurityState::G);
    }
}
