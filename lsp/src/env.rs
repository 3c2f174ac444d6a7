//! Environment for the server process, derived from the sysroot.

use std::path::Path;

use warden_toolchain::Environment;

const LIB_PATH_VARS: &[&str] = if cfg!(windows) {
    &["PATH"]
} else {
    &["LD_LIBRARY_PATH", "DYLD_LIBRARY_PATH"]
};

const RUST_SRC_PATH: &str = "RUST_SRC_PATH";

/// Add sysroot-derived variables to `env`.
///
/// With `set_lib_path`, `<sysroot>/lib` is put in front of the dynamic
/// library search path. `RUST_SRC_PATH` is only set when the caller's
/// environment does not already define it.
#[must_use]
pub fn server_environment(
    mut env: Environment,
    sysroot: Option<&Path>,
    set_lib_path: bool,
) -> Environment {
    let Some(sysroot) = sysroot else {
        return env;
    };

    if set_lib_path {
        let lib = sysroot.join("lib");
        let lib = lib.to_string_lossy();
        for var in LIB_PATH_VARS {
            env.prepend_path(var, &lib);
        }
    }

    if !env.is_set(RUST_SRC_PATH) {
        let src = sysroot
            .join("lib")
            .join("rustlib")
            .join("src")
            .join("rust")
            .join("src");
        env.set(RUST_SRC_PATH, src.to_string_lossy());
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_toolchain::PATH_LIST_SEPARATOR;

    #[cfg(unix)]
    #[test]
    fn lib_path_prefix_keeps_existing_value() {
        let env = Environment::from_pairs([("LD_LIBRARY_PATH", "/usr/local/lib")]);
        let env = server_environment(env, Some(Path::new("/sysroot")), true);
        assert_eq!(
            env.get("LD_LIBRARY_PATH"),
            Some(format!("/sysroot/lib{PATH_LIST_SEPARATOR}/usr/local/lib").as_str())
        );
        assert_eq!(env.get("DYLD_LIBRARY_PATH"), Some("/sysroot/lib"));
    }

    #[test]
    fn lib_path_untouched_when_disabled() {
        let base = Environment::from_pairs([("LD_LIBRARY_PATH", "/usr/local/lib")]);
        let env = server_environment(base.clone(), Some(Path::new("/sysroot")), false);
        assert_eq!(env.get("LD_LIBRARY_PATH"), base.get("LD_LIBRARY_PATH"));
        assert_eq!(env.get("DYLD_LIBRARY_PATH"), None);
    }

    #[cfg(unix)]
    #[test]
    fn rust_src_path_only_when_unset() {
        let env = server_environment(Environment::default(), Some(Path::new("/sysroot")), false);
        assert_eq!(
            env.get(RUST_SRC_PATH),
            Some("/sysroot/lib/rustlib/src/rust/src")
        );

        let external = Environment::from_pairs([(RUST_SRC_PATH, "/my/src")]);
        let env = server_environment(external, Some(Path::new("/sysroot")), true);
        assert_eq!(env.get(RUST_SRC_PATH), Some("/my/src"));
    }

    #[test]
    fn no_sysroot_leaves_environment_alone() {
        let base = Environment::from_pairs([("PATH", "/usr/bin")]);
        assert_eq!(server_environment(base.clone(), None, true), base);
    }
}
