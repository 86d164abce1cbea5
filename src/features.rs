//! Get/Set Features (spec.md §4.5).

use crate::controller::{AsyncEventInfo, AsyncEventType, FeatureId, LbaRangeType, PendingAsyncEvent};
use crate::error::StatusCode;
use crate::host::{host_read_prp, host_write_prp, BackingStore, HostMemory};
use crate::wire::{Cqe, Sqe};
use crate::Controller;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureOp {
    Get,
    Set,
}

fn lba_range_type_bytes(r: &LbaRangeType) -> [u8; 64] {
    let mut buf = [0u8; 64];
    buf[0] = r.kind;
    buf[1] = r.attributes;
    buf[16..24].copy_from_slice(&r.slba.to_le_bytes());
    buf[24..32].copy_from_slice(&r.nlb.to_le_bytes());
    buf
}

fn lba_range_type_from_bytes(buf: &[u8; 64]) -> LbaRangeType {
    LbaRangeType {
        kind: buf[0],
        attributes: buf[1],
        slba: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
        nlb: u64::from_le_bytes(buf[24..32].try_into().unwrap()),
    }
}

pub fn do_features<M: HostMemory, B: BackingStore>(
    c: &mut Controller<M, B>,
    sqe: &Sqe,
    cqe: &mut Cqe,
    op: FeatureOp,
) -> Result<(), StatusCode> {
    let fid = (sqe.cdw10 & 0xFF) as u8;
    let Some(feature) = FeatureId::from_u8(fid) else {
        return Err(StatusCode::InvalidField);
    };

    match feature {
        FeatureId::LbaRangeType => {
            let nsid = sqe.nsid;
            if nsid == 0 || nsid > c.state.cfg.nsmax || c.state.disks[nsid as usize].is_none() {
                return Err(StatusCode::InvalidNamespace);
            }
            match op {
                FeatureOp::Get => {
                    let bytes =
                        lba_range_type_bytes(&c.state.disks[nsid as usize].as_ref().unwrap().range_type);
                    host_write_prp(&c.mem, sqe.prp1, sqe.prp2, c.state.cfg.page_size as u64, &bytes)
                        .map_err(|_| StatusCode::DataXferError)?;
                }
                FeatureOp::Set => {
                    let mut bytes = [0u8; 64];
                    host_read_prp(&c.mem, sqe.prp1, sqe.prp2, c.state.cfg.page_size as u64, &mut bytes)
                        .map_err(|_| StatusCode::DataXferError)?;
                    c.state.disks[nsid as usize].as_mut().unwrap().range_type =
                        lba_range_type_from_bytes(&bytes);
                }
            }
            Ok(())
        }
        FeatureId::TemperatureThreshold => {
            if op == FeatureOp::Set {
                let new_threshold = sqe.cdw11;
                if new_threshold <= c.state.temperature && !c.state.temp_warn_issued {
                    c.state.async_queue.push_back(PendingAsyncEvent {
                        kind: AsyncEventType::Smart,
                        info: AsyncEventInfo::SmartTempThresh,
                        log_page: crate::identify::LOG_SMART_INFORMATION,
                    });
                    c.state.temp_warn_issued = true;
                }
                c.state.set_feature(feature, new_threshold);
            }
            cqe.cmd_specific = c.state.get_feature(feature);
            Ok(())
        }
        FeatureId::NumberOfQueues => {
            // NVMe peculiarity, reproduced per spec.md §9: SET does not
            // change the allocated value, it only echoes what GET would
            // have returned.
            if op == FeatureOp::Get {
                // leave the register as-is
            }
            cqe.cmd_specific = c.state.get_feature(feature);
            Ok(())
        }
        _ => {
            if op == FeatureOp::Set {
                c.state.set_feature(feature, sqe.cdw11);
            }
            cqe.cmd_specific = c.state.get_feature(feature);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_controller;

    #[test]
    fn set_then_get_round_trips_scalar_feature() {
        let mut c = test_controller();
        let mut sqe = Sqe::default();
        sqe.cdw10 = 0x01; // arbitration
        sqe.cdw11 = 0x1234;
        let mut cqe = Cqe::default();
        do_features(&mut c, &sqe, &mut cqe, FeatureOp::Set).unwrap();
        assert_eq!(cqe.cmd_specific, 0x1234);

        let mut cqe2 = Cqe::default();
        do_features(&mut c, &sqe, &mut cqe2, FeatureOp::Get).unwrap();
        assert_eq!(cqe2.cmd_specific, 0x1234);
    }

    #[test]
    fn number_of_queues_set_does_not_change_value() {
        let mut c = test_controller();
        c.state.set_feature(FeatureId::NumberOfQueues, 7);

        let mut sqe = Sqe::default();
        sqe.cdw10 = 0x07;
        sqe.cdw11 = 99;
        let mut cqe = Cqe::default();
        do_features(&mut c, &sqe, &mut cqe, FeatureOp::Set).unwrap();
        assert_eq!(cqe.cmd_specific, 7);
        assert_eq!(c.state.get_feature(FeatureId::NumberOfQueues), 7);
    }

    #[test]
    fn temperature_threshold_crossing_enqueues_async_event() {
        let mut c = test_controller();
        c.state.temperature = 320;
        let mut sqe = Sqe::default();
        sqe.cdw10 = 0x04;
        sqe.cdw11 = 300;
        let mut cqe = Cqe::default();
        do_features(&mut c, &sqe, &mut cqe, FeatureOp::Set).unwrap();
        assert_eq!(c.state.async_queue.len(), 1);
        assert!(c.state.temp_warn_issued);
    }

    #[test]
    fn unknown_feature_id_rejected() {
        let mut c = test_controller();
        let mut sqe = Sqe::default();
        sqe.cdw10 = 0xFE;
        let mut cqe = Cqe::default();
        assert_eq!(
            do_features(&mut c, &sqe, &mut cqe, FeatureOp::Get).unwrap_err(),
            StatusCode::InvalidField
        );
    }
}
