use eyre::Context as _;
use rand::Rng as _;
use std::{
    fs::{self, OpenOptions},
    io::Write as _,
    path::{Path, PathBuf},
};

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt as _, PermissionsExt as _};

pub const MODE_DIR_PRIVATE: u32 = 0o700;
pub const MODE_FILE_PRIVATE: u32 = 0o600;

/// Prefix of in-flight temp files. Anything starting with it is not a record.
pub const TMP_PREFIX: char = '.';

fn is_symlink(p: &Path) -> eyre::Result<bool> {
    let md = fs::symlink_metadata(p).with_context(|| format!("stat {}", p.display()))?;
    Ok(md.file_type().is_symlink())
}

/// Create `dir` (and parents) if needed and clamp it to owner-only access.
pub fn ensure_private_dir(dir: &Path) -> eyre::Result<()> {
    match fs::symlink_metadata(dir) {
        Ok(md) if md.file_type().is_symlink() => {
            eyre::bail!("refusing to use symlinked directory: {}", dir.display())
        }
        Ok(md) if !md.is_dir() => eyre::bail!("not a directory: {}", dir.display()),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            fs::create_dir_all(dir).with_context(|| format!("create dir {}", dir.display()))?;
        }
        Err(e) => return Err(eyre::Report::new(e).wrap_err(format!("stat {}", dir.display()))),
    }

    #[cfg(unix)]
    {
        let perms = fs::metadata(dir)
            .with_context(|| format!("stat {}", dir.display()))?
            .permissions();
        if perms.mode() & 0o077 != 0 {
            fs::set_permissions(dir, fs::Permissions::from_mode(MODE_DIR_PRIVATE))
                .with_context(|| format!("restrict {}", dir.display()))?;
        }
    }
    Ok(())
}

fn tmp_path_for(parent: &Path, final_name: &Path) -> PathBuf {
    let base = final_name
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("record");
    let mut rand_bytes = [0_u8; 8];
    rand::rng().fill_bytes(&mut rand_bytes);
    parent.join(format!("{TMP_PREFIX}{base}.tmp.{}", hex::encode(rand_bytes)))
}

/// Write via a fresh temp file, fsync, then rename over `path`.
///
/// Readers observe either the old contents or the new ones, never a torn record.
pub fn write_atomic_restrictive(path: &Path, bytes: &[u8], mode: u32) -> eyre::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| eyre::eyre!("missing parent for {}", path.display()))?;
    ensure_private_dir(parent)?;

    if path.exists() && is_symlink(path)? {
        eyre::bail!("refusing to replace symlink: {}", path.display());
    }
    let tmp = tmp_path_for(parent, path);

    let mut oo = OpenOptions::new();
    oo.create_new(true).write(true);
    #[cfg(unix)]
    {
        oo.mode(mode);
    }
    #[cfg(not(unix))]
    {
        let _: u32 = mode;
    }
    let mut f = oo
        .open(&tmp)
        .with_context(|| format!("open temp {}", tmp.display()))?;

    let written = f
        .write_all(bytes)
        .and_then(|()| f.flush())
        .and_then(|()| f.sync_all());
    drop(f);
    if let Err(e) = written {
        drop(fs::remove_file(&tmp));
        return Err(eyre::Report::new(e).wrap_err(format!("write {}", tmp.display())));
    }

    // Windows rename does not replace an existing file.
    #[cfg(windows)]
    remove_if_exists(path)?;

    fs::rename(&tmp, path).with_context(|| format!("replace {}", path.display()))
}

pub fn write_string_atomic_restrictive(path: &Path, s: &str, mode: u32) -> eyre::Result<()> {
    write_atomic_restrictive(path, s.as_bytes(), mode)
}

/// Remove a file; a missing file is not an error.
pub fn remove_if_exists(path: &Path) -> eyre::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(eyre::Report::new(e).wrap_err(format!("remove {}", path.display()))),
    }
}
