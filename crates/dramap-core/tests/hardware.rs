//! Tests requiring root, reserved 1 GiB hugepages, and a quiet pinned core.
//! Run with `cargo test -- --ignored` on a prepared machine.

use dramap_core::config::GB;
use dramap_core::util::CACHELINE_SIZE;
use dramap_core::{
    Addressing, AddressingConfig, DdrType, DramConfig, MemoryConfig, MemoryPool, Platform,
    PoolConfig,
};

fn small_pool() -> PoolConfig {
    PoolConfig {
        page_size: GB,
        num_pages: 1,
        granularity: CACHELINE_SIZE,
        huge: true,
    }
}

#[test]
#[ignore]
fn test_pool_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let mut pool = MemoryPool::new(small_pool(), 0x42)?;
    for _ in 0..1_000 {
        let tuple = pool.sample()?;
        assert_eq!(tuple.vaddr as u64 % 64, 0);
        assert_eq!(tuple.paddr % 64, 0);
        let back = pool.phys_to_virt(tuple.paddr)?;
        assert_eq!(back, Some(tuple.vaddr));
    }
    Ok(())
}

#[test]
#[ignore]
fn test_hugepage_is_physically_contiguous() -> Result<(), Box<dyn std::error::Error>> {
    let mut pool = MemoryPool::new(small_pool(), 0x42)?;
    let base = pool.page(0) as u64;
    let base_phys = pool.virt_to_phys(base)?;
    for offset in [4096u64, 1 << 20, 1 << 29, GB - 64] {
        assert_eq!(pool.virt_to_phys(base + offset)?, base_phys + offset);
    }
    Ok(())
}

#[test]
#[ignore]
fn test_reverse_pipeline_smoke() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let dram = DramConfig::from_module(DdrType::Ddr4, 32 * GB, 2, 8)?;
    let memory = MemoryConfig::single_channel(1, dram);
    let mut addressing = Addressing::new(
        Platform::IntelDdr4,
        memory,
        PoolConfig::hugepages(19),
        AddressingConfig {
            fname_prefix: "smoke".to_owned(),
            verbose: true,
            logging: false,
            debug: false,
        },
    )?;
    let derived = addressing.reverse_addressing_functions()?;
    if derived {
        let functions = addressing.addressing_functions().to_vec();
        addressing.identify_bits(&functions)?;
        assert!(addressing.validate_address_mapping());
    }
    Ok(())
}
