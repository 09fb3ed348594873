//! Package command - assemble and sign an APK

use crate::cli::args::PackageArgs;
use crate::config::Config;
use crate::error::{DroidpackError, DroidpackResult};
use crate::packager::{ApkBuilder, PackagerOptions, RsaSigner, Signer};
use crate::ui::{self, UiContext};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Everything needed to build one APK, resolved from arguments and config
#[derive(Debug)]
struct PackagePlan {
    output: PathBuf,
    resources: Vec<PathBuf>,
    res_dirs: Vec<PathBuf>,
    dex_dir: Option<PathBuf>,
    extra_dex: Vec<PathBuf>,
    native_libs: Option<PathBuf>,
    abi_filter: Option<Vec<String>>,
    signing: Option<(PathBuf, PathBuf)>,
    options: PackagerOptions,
}

impl PackagePlan {
    fn resolve(args: PackageArgs, config: &Config) -> Self {
        let package = &config.package;

        let abis = if args.abi.is_empty() {
            package.abi_filter.clone()
        } else {
            args.abi
        };

        let signing = if args.unsigned {
            None
        } else {
            match (args.key, args.cert) {
                (Some(key), Some(cert)) => Some((key, cert)),
                _ => config
                    .signing
                    .key_pair()
                    .map(|(key, cert)| (key.clone(), cert.clone())),
            }
        };

        let mut merge_paths = package.merge.clone();
        merge_paths.extend(args.merge);
        let mut excludes = package.excludes.clone();
        excludes.extend(args.exclude);

        Self {
            output: args.out,
            resources: args.resources,
            res_dirs: args.res_dir,
            dex_dir: args.dex_dir,
            extra_dex: args.dex,
            native_libs: args.native_libs,
            abi_filter: (!abis.is_empty()).then_some(abis),
            signing,
            options: PackagerOptions {
                debug_jni: args.debug_jni || package.debug_jni,
                merge_paths,
                excludes,
                no_compress: package.no_compress.clone(),
            },
        }
    }

    /// Build the APK. Blocking: file and zip I/O throughout.
    fn assemble(self) -> DroidpackResult<PathBuf> {
        let signer: Option<Arc<dyn Signer>> = match &self.signing {
            Some((key, cert)) => Some(Arc::new(RsaSigner::from_files(key, cert)?)),
            None => None,
        };

        let mut apk = ApkBuilder::create(&self.output, signer, self.options)?;

        for resource in &self.resources {
            apk.add_zip_entries(resource)?;
        }
        for dir in &self.res_dirs {
            apk.add_directory_tree(dir)?;
        }
        if self.dex_dir.is_some() || !self.extra_dex.is_empty() {
            apk.add_dex_files(self.dex_dir.as_deref(), &self.extra_dex)?;
        }
        if let Some(libs) = &self.native_libs {
            apk.add_native_libraries(libs, self.abi_filter.as_deref())?;
        }

        apk.seal()
    }
}

/// Execute the package command
pub async fn execute(args: PackageArgs, config: &Config) -> DroidpackResult<()> {
    let ctx = UiContext::detect();
    let plan = PackagePlan::resolve(args, config);
    let signed = plan.signing.is_some();
    debug!("Package plan: {:?}", plan);

    let output = tokio::task::spawn_blocking(move || plan.assemble())
        .await
        .map_err(|e| DroidpackError::TaskPanicked(e.to_string()))??;

    let detail = if signed { "signed" } else { "unsigned" };
    ui::step_ok_detail(&ctx, &format!("Packaged {}", output.display()), detail);
    Ok(())
}
