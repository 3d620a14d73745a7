#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use mfemu::{
    AccessType, AddressSpaceControl, ArSelector, Arch, ArchMode, CpuContext, CpuId, Facilities,
    InstructionFault, ProgramInterrupt, System, SystemConfig, TlbFill, Translator, TxfConfig, Z900,
};

pub const STORAGE_SIZE: u64 = 0x10_0000;
pub const ASD: u64 = 0x0002_0000;
const CR_PRIMARY: usize = 1;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Translator mapping logical page `p` to absolute page `p`, counting its invocations.
///
/// The counter is shared so that clones handed to other CPU threads report into the same place.
#[derive(Debug, Clone, Default)]
pub struct IdentityDat {
    calls: Arc<AtomicUsize>,
}

impl IdentityDat {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<A: Arch> Translator<A> for IdentityDat {
    fn logical_to_main(
        &mut self,
        cpu: &mut CpuContext,
        vaddr: A::Vaddr,
        _arn: ArSelector,
        _acctype: AccessType,
        akey: u8,
        len: usize,
    ) -> Result<u64, ProgramInterrupt> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let addr: u64 = vaddr.into();
        if !cpu.system().storage().contains(addr, len) {
            return Err(ProgramInterrupt::Addressing);
        }
        cpu.install_tlb_entry::<A>(
            vaddr,
            TlbFill {
                asd: cpu.control_register(CR_PRIMARY),
                pte: addr & !0xFFF,
                main: addr & !0xFFF,
                acc: AccessType::READ | AccessType::WRITE,
                skey: akey,
                ..TlbFill::default()
            },
        );
        Ok(addr)
    }
}

pub fn system_with(txf: TxfConfig) -> Arc<System> {
    System::new(SystemConfig {
        main_storage_size: STORAGE_SIZE,
        max_cpus: 8,
        txf,
    })
    .unwrap()
}

/// z/Architecture CPU with transactional execution, primary-space mode, started.
pub fn z_cpu(system: &Arc<System>, id: CpuId) -> CpuContext {
    let mut cpu = system.configure_cpu(id, ArchMode::Z900).unwrap();
    cpu.enable_facilities(
        Facilities::TRANSACTIONAL_EXECUTION | Facilities::CONSTRAINED_TRANSACTIONAL_EXECUTION,
    )
    .unwrap();
    cpu.set_aea_mode(AddressSpaceControl::Primary);
    cpu.set_control_register(CR_PRIMARY, ASD);
    system.start_cpu(id).unwrap();
    cpu
}

pub fn access(
    cpu: &mut CpuContext,
    dat: &mut IdentityDat,
    vaddr: u64,
    len: usize,
    acctype: AccessType,
) -> Result<u64, InstructionFault> {
    mfemu::maddr_l::<Z900, _>(cpu, dat, vaddr, len, ArSelector::Primary, acctype, 0)
}

/// Transactional or not, a guest load of a big-endian word.
pub fn load(
    cpu: &mut CpuContext,
    dat: &mut IdentityDat,
    vaddr: u64,
) -> Result<u64, InstructionFault> {
    let maddr = access(cpu, dat, vaddr, 8, AccessType::READ)?;
    Ok(cpu.system().storage().read_u64_be(maddr).unwrap())
}

/// Transactional or not, a guest store of a big-endian word.
pub fn store(
    cpu: &mut CpuContext,
    dat: &mut IdentityDat,
    vaddr: u64,
    value: u64,
) -> Result<(), InstructionFault> {
    let maddr = access(cpu, dat, vaddr, 8, AccessType::WRITE)?;
    cpu.system().storage().write_u64_be(maddr, value).unwrap();
    Ok(())
}
