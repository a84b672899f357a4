//! Property tests for domain nesting over random topologies

use platio_driver::{
    domain_name, domain_type, is_nested, DomainType, PioError, TopologyResolver, TopologyTable,
};
use proptest::prelude::*;

/// Random but well-formed tables: arbitrary package/core/cpu assignment,
/// optional package-integrated memory and multi-chip GPUs.
fn arb_table() -> impl Strategy<Value = TopologyTable> {
    (1_usize..4, 0_usize..3)
        .prop_flat_map(|(packages, gpus)| {
            let chips = if gpus == 0 { 0..1 } else { 0..6 };
            (
                Just(packages),
                Just(gpus),
                prop::collection::vec(0..packages, 1..8),
                prop::collection::vec(0..packages, 0..4),
                prop::collection::vec(0..gpus.max(1), chips),
            )
        })
        .prop_flat_map(|(packages, gpus, cores, memory, chips)| {
            let num_core = cores.len();
            prop::collection::vec(0..num_core, 1..16).prop_map(move |cpus| {
                TopologyTable::new()
                    .with_domain(DomainType::Package, vec![0; packages])
                    .with_domain(DomainType::Core, cores.clone())
                    .with_domain(DomainType::Cpu, cpus)
                    .with_domain(DomainType::PackageIntegratedMemory, memory.clone())
                    .with_domain(DomainType::Gpu, vec![0; gpus])
                    .with_domain(DomainType::GpuChip, chips.clone())
            })
        })
}

proptest! {
    #[test]
    fn nested_indices_partition_inner_domain(table in arb_table()) {
        prop_assert!(table.validate().is_ok());
        let resolver = TopologyResolver::from_table(table);

        for inner in DomainType::ALL {
            for outer in DomainType::ALL {
                if !is_nested(inner, outer) {
                    let incompatible = matches!(
                        resolver.domain_nested(inner, outer, 0),
                        Err(PioError::IncompatibleDomains { .. })
                    );
                    prop_assert!(incompatible);
                    continue;
                }

                let inner_count = resolver.num_domain(inner).unwrap();
                let outer_count = resolver.num_domain(outer).unwrap();
                let mut seen = vec![0_u32; inner_count];
                for o in 0..outer_count {
                    let nested = resolver
                        .domain_nested(inner, outer, i64::try_from(o).unwrap())
                        .unwrap();
                    prop_assert!(nested.windows(2).all(|w| w[0] < w[1]), "not ascending");
                    for i in nested {
                        seen[i] += 1;
                    }
                }
                prop_assert!(
                    seen.iter().all(|&n| n == 1),
                    "{} in {}: coverage {:?}", inner, outer, seen
                );
            }
        }
    }

    #[test]
    fn cpu_index_agrees_with_nesting(table in arb_table()) {
        let resolver = TopologyResolver::from_table(table);
        let cpus = resolver.num_domain("cpu").unwrap();
        for outer in [DomainType::Board, DomainType::Package, DomainType::Core, DomainType::Cpu] {
            for cpu in 0..cpus {
                let cpu = i64::try_from(cpu).unwrap();
                let containing = resolver.domain_index(outer, cpu).unwrap();
                let members = resolver
                    .domain_nested("cpu", outer, i64::try_from(containing).unwrap())
                    .unwrap();
                prop_assert!(members.contains(&usize::try_from(cpu).unwrap()));
            }
        }
    }
}

#[test]
fn domain_type_inverts_domain_name() {
    for d in DomainType::ALL {
        assert_eq!(domain_type(domain_name(d)).unwrap(), d);
        assert_eq!(domain_type(d).unwrap(), d);
    }
}
