mod harness;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use harness::{access, init_tracing, system_with, z_cpu, IdentityDat};
use mfemu::{
    authorize_asn, purge_tlb_all, purge_tlbe_all, AccessType, AteMask, CpuTarget, TxfConfig, Z900,
};

#[test]
fn broadcast_purge_reaches_a_running_cpu() {
    init_tracing();
    let system = system_with(TxfConfig::default());
    let requester = z_cpu(&system, 0);
    let mut target = z_cpu(&system, 1);
    let dat = IdentityDat::default();
    let filled = Arc::new(Barrier::new(2));
    let purged = Arc::new(Barrier::new(2));

    let worker = {
        let (filled, purged) = (filled.clone(), purged.clone());
        let mut dat = dat.clone();
        thread::spawn(move || {
            access(&mut target, &mut dat, 0x3000, 4, AccessType::READ).unwrap();
            access(&mut target, &mut dat, 0x4000, 4, AccessType::READ).unwrap();
            access(&mut target, &mut dat, 0x3000, 4, AccessType::READ).unwrap();
            filled.wait();
            purged.wait();
            access(&mut target, &mut dat, 0x3000, 4, AccessType::READ).unwrap();
            access(&mut target, &mut dat, 0x4000, 4, AccessType::READ).unwrap();
        })
    };

    filled.wait();
    assert_eq!(dat.calls(), 2);
    {
        let _intlock = system.interlock().obtain(requester.id());
        purge_tlbe_all(&requester, 0x3000, CpuTarget::All);
    }
    purged.wait();
    worker.join().unwrap();

    // Only the page in frame 0x3000 had to be translated again.
    assert_eq!(dat.calls(), 3);

    {
        let _intlock = system.interlock().obtain(requester.id());
        purge_tlb_all(&requester, CpuTarget::from_cpuad(CpuTarget::ALL_CPUS));
    }
    let tlb_id = system.cpus().get(1).unwrap().lock_dat().tlb().id();
    assert_eq!(tlb_id, 2);
}

#[test]
fn purges_interleave_safely_with_lookups() {
    init_tracing();
    let system = system_with(TxfConfig::default());
    let stop = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (1..4u16)
        .map(|id| {
            let mut cpu = z_cpu(&system, id);
            let stop = stop.clone();
            thread::spawn(move || {
                let mut dat = IdentityDat::default();
                let mut page = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    let vaddr = 0x1_0000 + (page % 64) * 0x1000;
                    assert_eq!(
                        access(&mut cpu, &mut dat, vaddr, 4, AccessType::READ),
                        Ok(vaddr)
                    );
                    page += 1;
                }
            })
        })
        .collect();

    let requester = z_cpu(&system, 0);
    for round in 0..200u64 {
        let _intlock = system.interlock().obtain(requester.id());
        if round % 2 == 0 {
            purge_tlb_all(&requester, CpuTarget::All);
        } else {
            purge_tlbe_all(&requester, 0x1_0000 + (round % 64) * 0x1000, CpuTarget::All);
        }
    }
    stop.store(true, Ordering::Relaxed);
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(system.interlock().holder(), None);
}

#[test]
fn authorization_reads_the_authority_table_in_main_storage() {
    let system = system_with(TxfConfig::default());
    let cpu = z_cpu(&system, 0);
    // ax 0x11: byte 4, second 2-bit field.
    system.storage().write_u8(0x6004, 0b0001_0000).unwrap();
    let mut aste = [0u32; 16];
    aste[0] = 0x6000;
    aste[1] = 0x0010;

    assert_eq!(authorize_asn::<Z900>(0x11, &aste, AteMask::Primary, &cpu), Ok(false));
    assert_eq!(authorize_asn::<Z900>(0x11, &aste, AteMask::Secondary, &cpu), Ok(true));
    assert_eq!(authorize_asn::<Z900>(0x21, &aste, AteMask::Secondary, &cpu), Ok(false));
}
