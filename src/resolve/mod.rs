//! Dependency resolution: bundle definition to dependency edges.
//!
//! Shared libraries fan out across every device architecture, since the
//! bundle itself is architecture independent but must carry a library copy
//! for each ABI the device runs. Executables take the engine's default arch.
//! Java libraries and prebuilt files are unconstrained.
//!
//! ```text
//! native_shared_libs = ["libc"], arches = [arm64, arm]
//!     sharedLib 'libc' [arch:android_arm64, image:core, link:shared]
//!     sharedLib 'libc' [arch:android_arm, image:core, link:shared]
//! ```

use tracing::debug;

use crate::arch::{Arch, Os};
use crate::bundle::{BundleSpec, DependencyCategory};
use crate::error::{BundleError, Result};
use crate::graph::{DependencyEdge, DepsContext, EdgeRecorder, Variation};

/// Variations a shared library edge is constrained to for `arch`.
pub fn shared_lib_variations(os: Os, arch: Arch) -> Vec<Variation> {
    vec![
        Variation::arch(os, arch),
        Variation::core_image(),
        Variation::shared_link(),
    ]
}

/// Register every dependency of `spec` with `ctx`.
///
/// `arches` lists device arches first, then native-bridge arches. Fails with
/// [`BundleError::NoDeviceArch`] before registering anything when there is
/// no native primary arch, whatever native-bridge arches are present.
pub fn register_dependencies<C: DepsContext>(
    spec: &BundleSpec,
    arches: &[Arch],
    ctx: &mut C,
) -> Result<()> {
    if !arches.first().is_some_and(|arch| arch.native) {
        return Err(BundleError::NoDeviceArch);
    }

    let os = ctx.os();
    for arch in arches {
        ctx.add_far_variation_dependencies(
            &shared_lib_variations(os, *arch),
            DependencyCategory::SharedLib,
            &spec.native_shared_libs,
        );
    }

    ctx.add_far_variation_dependencies(
        &[Variation::core_image()],
        DependencyCategory::Executable,
        &spec.executables,
    );
    ctx.add_far_variation_dependencies(&[], DependencyCategory::JavaLib, &spec.java_libs);
    ctx.add_far_variation_dependencies(&[], DependencyCategory::Prebuilt, &spec.prebuilts);

    debug!(
        bundle = %spec.name,
        arches = arches.len(),
        shared_libs = spec.native_shared_libs.len(),
        executables = spec.executables.len(),
        java_libs = spec.java_libs.len(),
        prebuilts = spec.prebuilts.len(),
        "registered dependencies"
    );
    Ok(())
}

/// The edges [`register_dependencies`] would register, in registration order.
pub fn dependency_edges(spec: &BundleSpec, os: Os, arches: &[Arch]) -> Result<Vec<DependencyEdge>> {
    let mut recorder = EdgeRecorder::new(os);
    register_dependencies(spec, arches, &mut recorder)?;
    Ok(recorder.into_edges())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::ArchType;
    use crate::graph::{ARCH_MUTATOR, IMAGE_MUTATOR, LINK_MUTATOR};

    fn spec() -> BundleSpec {
        let mut spec = BundleSpec::new("com.android.runtime", ".");
        spec.native_shared_libs = vec!["libc".into(), "libm".into(), "libdl".into()];
        spec.executables = vec!["toybox".into()];
        spec.java_libs = vec!["core-oj".into()];
        spec.prebuilts = vec!["ld.config.txt".into()];
        spec
    }

    fn count(edges: &[DependencyEdge], tag: DependencyCategory) -> usize {
        edges.iter().filter(|e| e.tag == tag).count()
    }

    #[test]
    fn test_shared_libs_fan_out_per_arch() {
        let arch_sets: [&[ArchType]; 3] = [
            &[ArchType::Arm64],
            &[ArchType::Arm64, ArchType::Arm],
            &[ArchType::X86_64, ArchType::X86, ArchType::Arm64],
        ];
        for set in arch_sets {
            let arches: Vec<Arch> = set.iter().copied().map(Arch::native).collect();
            let edges = dependency_edges(&spec(), Os::Android, &arches).unwrap();
            assert_eq!(count(&edges, DependencyCategory::SharedLib), 3 * arches.len());

            for lib in ["libc", "libm", "libdl"] {
                for arch in &arches {
                    let wanted = arch.variation(Os::Android);
                    let matching = edges
                        .iter()
                        .filter(|e| e.name == lib && e.arch_variation() == Some(wanted.as_str()))
                        .count();
                    assert_eq!(matching, 1, "{lib} for {arch}");
                }
            }
        }
    }

    #[test]
    fn test_shared_lib_edges_carry_all_constraints() {
        let arches = [Arch::native(ArchType::Arm64)];
        let edges = dependency_edges(&spec(), Os::Android, &arches).unwrap();
        let libc = edges
            .iter()
            .find(|e| e.tag == DependencyCategory::SharedLib && e.name == "libc")
            .unwrap();

        assert!(libc.requires(ARCH_MUTATOR, "android_arm64"));
        assert!(libc.requires(IMAGE_MUTATOR, "core"));
        assert!(libc.requires(LINK_MUTATOR, "shared"));
    }

    #[test]
    fn test_other_categories_single_edge() {
        let arches = [Arch::native(ArchType::Arm64), Arch::native(ArchType::Arm)];
        let edges = dependency_edges(&spec(), Os::Android, &arches).unwrap();

        assert_eq!(count(&edges, DependencyCategory::Executable), 1);
        assert_eq!(count(&edges, DependencyCategory::JavaLib), 1);
        assert_eq!(count(&edges, DependencyCategory::Prebuilt), 1);

        let toybox = edges.iter().find(|e| e.name == "toybox").unwrap();
        assert_eq!(toybox.variations, vec![Variation::core_image()]);

        for name in ["core-oj", "ld.config.txt"] {
            let e = edges.iter().find(|e| e.name == name).unwrap();
            assert!(e.variations.is_empty());
        }
    }

    #[test]
    fn test_registration_order_is_arch_then_declaration() {
        let arches = [Arch::native(ArchType::Arm), Arch::native(ArchType::Arm64)];
        let edges = dependency_edges(&spec(), Os::Android, &arches).unwrap();
        let order: Vec<String> = edges.iter().map(ToString::to_string).take(4).collect();

        assert_eq!(
            order,
            vec![
                "sharedLib 'libc' [arch:android_arm, image:core, link:shared]",
                "sharedLib 'libm' [arch:android_arm, image:core, link:shared]",
                "sharedLib 'libdl' [arch:android_arm, image:core, link:shared]",
                "sharedLib 'libc' [arch:android_arm64, image:core, link:shared]",
            ]
        );
    }

    #[test]
    fn test_empty_arch_list_fails_before_any_edge() {
        let mut recorder = EdgeRecorder::new(Os::Android);
        let err = register_dependencies(&spec(), &[], &mut recorder).unwrap_err();

        assert!(matches!(err, BundleError::NoDeviceArch));
        assert!(recorder.edges().is_empty());
    }

    #[test]
    fn test_native_bridge_only_fails_before_any_edge() {
        let mut recorder = EdgeRecorder::new(Os::Android);
        let arches = [Arch::native_bridge(ArchType::Arm64)];
        let err = register_dependencies(&spec(), &arches, &mut recorder).unwrap_err();

        assert!(matches!(err, BundleError::NoDeviceArch));
        assert!(recorder.edges().is_empty());
    }

    #[test]
    fn test_empty_spec_yields_no_edges() {
        let spec = BundleSpec::new("empty", ".");
        let edges = dependency_edges(&spec, Os::Android, &[Arch::native(ArchType::Arm64)]).unwrap();
        assert!(edges.is_empty());
    }
}
