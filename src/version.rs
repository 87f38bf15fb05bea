//! Build metadata stamped in by `build.rs`

use std::fmt;

#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub git_hash: &'static str,
    pub git_branch: &'static str,
    pub dirty: bool,
    pub built_at: &'static str,
    pub target: &'static str,
    pub host: &'static str,
    pub profile: &'static str,
    pub rustc: &'static str,
}

pub fn build_info() -> BuildInfo {
    BuildInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        git_hash: env!("FIELDMESH_GIT_HASH"),
        git_branch: env!("FIELDMESH_GIT_BRANCH"),
        dirty: matches!(env!("FIELDMESH_GIT_DIRTY"), "true"),
        built_at: env!("FIELDMESH_BUILD_TIMESTAMP"),
        target: env!("FIELDMESH_TARGET"),
        host: env!("FIELDMESH_HOST"),
        profile: env!("FIELDMESH_PROFILE"),
        rustc: env!("FIELDMESH_RUSTC_VERSION"),
    }
}

impl BuildInfo {
    /// `0.1.0-1a2b3c4d`, with `-dirty` for uncommitted builds
    pub fn full_version(&self) -> String {
        let suffix = if self.dirty { "-dirty" } else { "" };
        format!("{}-{}{}", self.version, self.git_hash, suffix)
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}\n", self.name, self.full_version())?;
        writeln!(f, "Build Information:")?;
        for (label, value) in [
            ("Git Hash", self.git_hash),
            ("Git Branch", self.git_branch),
            ("Built", self.built_at),
            ("Profile", self.profile),
            ("Target", self.target),
            ("Host", self.host),
            ("Compiler", self.rustc),
        ] {
            writeln!(f, "  {:<11} {}", format!("{}:", label), value)?;
        }
        Ok(())
    }
}

pub fn print_version() {
    print!("{}", build_info());
}
