//! Standalone harness for driving the admin command processor from the
//! command line, useful for poking at a controller without a full PCIe
//! front-end attached.

use anyhow::{bail, Context, Result};
use nvme_adm::config::AdmConfig;
use nvme_adm::controller::Controller;
use nvme_adm::host::{FileBackingStore, FlatHostMemory, HostMemory};
use nvme_adm::wire::Sqe;
use std::env;

const GUEST_RAM_BYTES: usize = 64 * 1024 * 1024;

fn usage() -> ! {
    eprintln!(
        "usage: nvme-admctl [--config <path>] <command> [args...]\n\
         commands:\n\
         \tidentify-ctrl\n\
         \tidentify-ns <nsid>\n\
         \tcreate-ns <nsid> <nsze> <block-size>\n\
         \tdelete-ns <nsid>\n\
         \tget-smart-log [<nsid>]"
    );
    std::process::exit(2);
}

fn main() -> Result<()> {
    env_logger::init();

    let mut args: Vec<String> = env::args().skip(1).collect();
    let cfg = if args.first().map(String::as_str) == Some("--config") {
        if args.len() < 2 {
            usage();
        }
        let path = args.remove(1);
        args.remove(0);
        AdmConfig::from_file(&path).with_context(|| format!("loading config from {path}"))?
    } else {
        AdmConfig::default()
    };

    if args.is_empty() {
        usage();
    }

    let store = FileBackingStore::new(&cfg.firmware_image_path.parent().unwrap_or(std::path::Path::new(".")));
    let mem = FlatHostMemory::new(GUEST_RAM_BYTES);
    let mut controller = Controller::new(cfg, 1024 * 1024 * 1024, mem, store);

    let command = args.remove(0);
    match command.as_str() {
        "identify-ctrl" => {
            let sqe = Sqe {
                opcode: 0x06,
                prp1: 0x1000,
                ..Default::default()
            };
            run_and_report(&mut controller, &sqe)?;
        }
        "identify-ns" => {
            let nsid: u32 = args.first().context("missing nsid")?.parse()?;
            let sqe = Sqe {
                opcode: 0x06,
                nsid,
                prp1: 0x1000,
                ..Default::default()
            };
            run_and_report(&mut controller, &sqe)?;
        }
        "create-ns" => {
            if args.len() < 3 {
                usage();
            }
            let nsid: u32 = args[0].parse()?;
            let nsze: u64 = args[1].parse()?;
            let block_size: u32 = args[2].parse()?;

            // CREATE_NAMESPACE reads a namespace-identify-shaped payload by
            // PRP rather than scalar cdw fields; stash it past guest RAM's
            // low identify scratch area.
            let mut payload = [0u8; 4096];
            payload[0..8].copy_from_slice(&nsze.to_le_bytes());
            payload[8..16].copy_from_slice(&nsze.to_le_bytes()); // ncap == nsze
            controller.mem.host_write(0x2000, &payload)?;

            let sqe = Sqe {
                opcode: 0xC4,
                nsid,
                cdw12: block_size,
                prp1: 0x2000,
                ..Default::default()
            };
            run_and_report(&mut controller, &sqe)?;
        }
        "delete-ns" => {
            let nsid: u32 = args.first().context("missing nsid")?.parse()?;
            let sqe = Sqe {
                opcode: 0xC6,
                nsid,
                ..Default::default()
            };
            run_and_report(&mut controller, &sqe)?;
        }
        "get-smart-log" => {
            let nsid: u32 = args
                .first()
                .map(|s| s.parse())
                .transpose()?
                .unwrap_or(0xFFFF_FFFF);
            let sqe = Sqe {
                opcode: 0x02,
                nsid,
                cdw10: nvme_adm::identify::LOG_SMART_INFORMATION as u32,
                prp1: 0x1000,
                ..Default::default()
            };
            run_and_report(&mut controller, &sqe)?;
        }
        other => {
            bail!("unknown command: {other}");
        }
    }

    Ok(())
}

fn run_and_report<M: nvme_adm::host::HostMemory, B: nvme_adm::host::BackingStore>(
    controller: &mut Controller<M, B>,
    sqe: &Sqe,
) -> Result<()> {
    let cqe = nvme_adm::process_admin(controller, 0, sqe);
    let sc = (cqe.status >> 1) & 0xFF;
    let sct = (cqe.status >> 9) & 0x7;
    if sc == 0 && sct == 0 {
        println!("OK cmd_specific={:#010x}", cqe.cmd_specific);
    } else {
        println!("FAILED sct={sct} sc={sc}");
    }
    Ok(())
}
