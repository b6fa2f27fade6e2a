//! Variant selection
//!
//! Pure function of (entry, host fingerprint, options): the same inputs
//! always pick the same variant, in every process.

use super::host::HostFingerprint;
use super::options::ProvisionOptions;
use crate::payload::{PayloadEntry, PayloadVariant};
use tracing::{info, warn};

pub fn select_variant<'m>(
    entry: &'m PayloadEntry,
    host: &HostFingerprint,
    options: &ProvisionOptions,
) -> Option<&'m PayloadVariant> {
    if let Some(forced) = options.force_variant.as_deref() {
        match entry.variant(forced) {
            Some(variant) => {
                if !variant.requirement().satisfied_by(host) {
                    warn!(
                        "{}: forced variant '{}' needs {} which was not detected; using it anyway",
                        entry.backend,
                        forced,
                        variant.requirement()
                    );
                }
                info!("{}: using forced variant '{}'", entry.backend, forced);
                return Some(variant);
            }
            None => warn!(
                "{}: forced variant '{}' is not bundled for {}/{}, falling back to detection",
                entry.backend, forced, entry.platform, entry.arch
            ),
        }
    }

    entry
        .variants()
        .iter()
        .filter(|v| !(options.force_cpu && v.requirement().is_accelerator()))
        .find(|v| v.requirement().satisfied_by(host))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::payload::PayloadFile;
    use crate::provisioner::host::{Arch, CpuFeatures, GpuKind, Platform};
    use proptest::prelude::*;

    fn entry(names: &[&str]) -> PayloadEntry {
        let variants = names
            .iter()
            .map(|n| PayloadVariant::new(*n, vec![PayloadFile::new("lib.so", n.as_bytes().to_vec())]))
            .collect();
        PayloadEntry::new(Backend::LlamaCpp, Platform::Linux, Arch::X86_64, variants)
    }

    fn avx2_host() -> HostFingerprint {
        HostFingerprint::new(Platform::Linux, Arch::X86_64).with_cpu(CpuFeatures {
            avx: true,
            avx2: true,
            avx512f: false,
        })
    }

    #[test]
    fn test_gpu_variant_preferred_when_present() {
        let e = entry(&["cpu", "cpu_avx2", "cuda_v12"]);
        let host = avx2_host().with_gpu(GpuKind::Cuda);
        let chosen = select_variant(&e, &host, &ProvisionOptions::new()).unwrap();
        assert_eq!(chosen.name(), "cuda_v12");
    }

    #[test]
    fn test_widest_simd_without_gpu() {
        let e = entry(&["cpu", "cpu_avx", "cpu_avx2", "cpu_avx512", "cuda_v12"]);
        let chosen = select_variant(&e, &avx2_host(), &ProvisionOptions::new()).unwrap();
        assert_eq!(chosen.name(), "cpu_avx2");
    }

    #[test]
    fn test_force_cpu_skips_accelerators() {
        let e = entry(&["cpu", "cpu_avx2", "cuda_v12"]);
        let host = avx2_host().with_gpu(GpuKind::Cuda);
        let chosen = select_variant(&e, &host, &ProvisionOptions::new().force_cpu(true)).unwrap();
        assert_eq!(chosen.name(), "cpu_avx2");
    }

    #[test]
    fn test_force_variant_pins_generic_cpu_on_gpu_host() {
        let e = entry(&["cpu-generic", "cpu-avx2", "cuda12"]);
        let host = avx2_host().with_gpu(GpuKind::Cuda);
        let opts = ProvisionOptions::new().force_variant("cpu-generic");
        assert_eq!(select_variant(&e, &host, &opts).unwrap().name(), "cpu-generic");
    }

    #[test]
    fn test_unknown_forced_variant_falls_back() {
        let e = entry(&["cpu", "cpu_avx2"]);
        let opts = ProvisionOptions::new().force_variant("vulkan");
        assert_eq!(select_variant(&e, &avx2_host(), &opts).unwrap().name(), "cpu_avx2");
    }

    #[test]
    fn test_nothing_satisfiable() {
        let e = entry(&["cuda_v12", "cpu_avx2"]);
        let bare = HostFingerprint::new(Platform::Linux, Arch::X86_64);
        assert!(select_variant(&e, &bare, &ProvisionOptions::new()).is_none());
    }

    proptest! {
        #[test]
        fn prop_selection_is_deterministic_and_order_independent(
            avx in any::<bool>(),
            avx2 in any::<bool>(),
            avx512f in any::<bool>(),
            cuda in any::<bool>(),
            rocm in any::<bool>(),
            force_cpu in any::<bool>(),
            rotate in 0usize..6,
        ) {
            let mut names = vec!["cpu", "cpu_avx", "cpu_avx2", "cpu_avx512", "cuda_v12", "rocm"];
            let baseline = entry(&names);
            names.rotate_left(rotate);
            let rotated = entry(&names);

            let mut host = HostFingerprint::new(Platform::Linux, Arch::X86_64)
                .with_cpu(CpuFeatures { avx, avx2, avx512f });
            if cuda { host = host.with_gpu(GpuKind::Cuda); }
            if rocm { host = host.with_gpu(GpuKind::Rocm); }
            let opts = ProvisionOptions::new().force_cpu(force_cpu);

            let a = select_variant(&baseline, &host, &opts).map(|v| v.name().to_string());
            let b = select_variant(&baseline, &host, &opts).map(|v| v.name().to_string());
            let c = select_variant(&rotated, &host, &opts).map(|v| v.name().to_string());
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(&a, &c);
            // generic cpu is always usable
            prop_assert!(a.is_some());
            if let Some(name) = a {
                let chosen = baseline.variant(&name).unwrap();
                prop_assert!(chosen.requirement().satisfied_by(&host));
                prop_assert!(!(force_cpu && chosen.requirement().is_accelerator()));
            }
        }
    }
}
