use std::{io::Write, path::Path};

use tempfile::NamedTempFile;

use blockmeta_api::{
    config::DmCrypt,
    constants::DEV_MAPPER_DIR,
    status::{HandlerFailure, Operation, StepError},
};
use osutils::cryptsetup::{self, LuksOptions};

use super::{HandlerContext, ProbeOutcome, Resolution, StepResultExt};

pub(super) fn probe(ctx: &HandlerContext, crypt: &DmCrypt) -> Result<ProbeOutcome, StepError> {
    let volume = ctx.device_path(&crypt.volume)?;
    let mapping = Path::new(DEV_MAPPER_DIR).join(crypt.mapping_name());

    Ok(match ctx.inventory.device(&mapping) {
        Some(existing)
            if existing.device_type == "crypt" && existing.parents.iter().any(|p| p == volume) =>
        {
            ProbeOutcome::Satisfied(Some(Resolution::node(mapping)))
        }
        Some(existing) => ProbeOutcome::Conflict(format!(
            "'{}' already exists and is not an encrypted mapping of '{}'",
            existing.path.display(),
            volume.display()
        )),
        None => ProbeOutcome::Missing,
    })
}

/// Passphrase material handed to cryptsetup. An inline key is written to a
/// private temporary file that is removed when this is dropped.
enum KeyFile<'a> {
    Declared(&'a Path),
    Temporary(NamedTempFile),
}

impl KeyFile<'_> {
    fn path(&self) -> &Path {
        match self {
            Self::Declared(path) => path,
            Self::Temporary(file) => file.path(),
        }
    }
}

fn key_file(crypt: &DmCrypt) -> Result<KeyFile<'_>, StepError> {
    let internal = |reason: String| {
        StepError::new(
            Operation::CreateEncryptedVolume,
            HandlerFailure::Internal { reason },
        )
    };

    if let Some(path) = &crypt.keyfile {
        return Ok(KeyFile::Declared(path));
    }
    let key = crypt
        .key
        .as_deref()
        .ok_or_else(|| internal(format!("Encrypted volume '{}' has no key", crypt.id)))?;

    let mut file = NamedTempFile::new()
        .map_err(|e| internal(format!("Failed to create temporary key file: {e}")))?;
    file.write_all(key.as_bytes())
        .and_then(|()| file.flush())
        .map_err(|e| internal(format!("Failed to write temporary key file: {e}")))?;
    Ok(KeyFile::Temporary(file))
}

pub(super) fn create(ctx: &HandlerContext, crypt: &DmCrypt) -> Result<Resolution, StepError> {
    let volume = ctx.device_path(&crypt.volume)?;
    let key_file = key_file(crypt)?;

    cryptsetup::luks_format(
        ctx.runner,
        volume,
        key_file.path(),
        LuksOptions {
            cipher: crypt.cipher.as_deref(),
            key_size: crypt.keysize,
        },
    )
    .step(Operation::CreateEncryptedVolume)?;
    cryptsetup::open(ctx.runner, volume, crypt.mapping_name(), key_file.path())
        .step(Operation::OpenEncryptedVolume)?;

    let mapping = Path::new(DEV_MAPPER_DIR).join(crypt.mapping_name());
    ctx.wait_for_device(&mapping)?;
    Ok(Resolution::node(mapping))
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use blockmeta_api::config::StorageEntry;

    use super::{super::test_utils::*, *};

    const DOCUMENT: &str = indoc! {r#"
        version: 1
        config:
          - {type: disk, id: sda, path: /dev/sda}
          - {type: disk, id: sdb, path: /dev/sdb}
          - {type: dm_crypt, id: cryptroot, volume: sda, keyfile: /etc/keys/root.key, cipher: aes-xts-plain64, keysize: 512}
          - {type: dm_crypt, id: cryptdata, volume: sdb, dm_name: data, key: hunter2}
    "#};

    fn crypt_fixture(inventory: &str) -> Fixture {
        let mut fixture = Fixture::new(DOCUMENT, inventory);
        fixture.resolve("sda", "/dev/sda").resolve("sdb", "/dev/sdb");
        fixture
    }

    fn crypt(fixture: &Fixture, id: &str) -> DmCrypt {
        match fixture.entry(id) {
            StorageEntry::DmCrypt(crypt) => crypt.clone(),
            other => panic!("not a dm_crypt: {other:?}"),
        }
    }

    #[test]
    fn test_create_with_keyfile() {
        let fixture = crypt_fixture(EMPTY_DISKS);
        let resolution = create(&fixture.ctx(), &crypt(&fixture, "cryptroot")).unwrap();

        assert_eq!(resolution, Resolution::node("/dev/mapper/cryptroot"));
        assert_eq!(
            fixture.runner.calls(),
            [
                "cryptsetup luksFormat --batch-mode --cipher=aes-xts-plain64 --key-size=512 \
                    --key-file=/etc/keys/root.key /dev/sda",
                "cryptsetup open --type=luks --key-file=/etc/keys/root.key /dev/sda cryptroot",
                "udevadm wait --settle --timeout=120 /dev/mapper/cryptroot",
            ]
        );
    }

    #[test]
    fn test_create_with_inline_key() {
        let fixture = crypt_fixture(EMPTY_DISKS);
        let resolution = create(&fixture.ctx(), &crypt(&fixture, "cryptdata")).unwrap();
        assert_eq!(resolution, Resolution::node("/dev/mapper/data"));

        let calls = fixture.runner.mutating_calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].starts_with("cryptsetup luksFormat --batch-mode --key-file=/"));
        assert!(calls[0].ends_with(" /dev/sdb"));
        assert!(calls[1].starts_with("cryptsetup open --type=luks --key-file=/"));
        assert!(calls[1].ends_with(" /dev/sdb data"));

        // The temporary key file is gone once the volume is open.
        let key_path = calls[1]
            .split_whitespace()
            .find_map(|arg| arg.strip_prefix("--key-file="))
            .unwrap();
        assert!(!Path::new(key_path).exists());
    }

    #[test]
    fn test_key_file_contents() {
        let fixture = crypt_fixture(EMPTY_DISKS);
        let entry = crypt(&fixture, "cryptdata");
        let key_file = key_file(&entry).unwrap();
        assert_eq!(std::fs::read_to_string(key_file.path()).unwrap(), "hunter2");
    }

    #[test]
    fn test_probe() {
        let fixture = crypt_fixture(EMPTY_DISKS);
        assert_eq!(
            probe(&fixture.ctx(), &crypt(&fixture, "cryptroot")).unwrap(),
            ProbeOutcome::Missing
        );

        let fixture = crypt_fixture(indoc! {r#"
            block_devices:
              - {path: /dev/mapper/cryptroot, device_type: crypt, parents: [/dev/sda]}
              - {path: /dev/mapper/data, device_type: crypt, parents: [/dev/sdc]}
        "#});
        let ctx = fixture.ctx();
        assert_eq!(
            probe(&ctx, &crypt(&fixture, "cryptroot")).unwrap(),
            ProbeOutcome::Satisfied(Some(Resolution::node("/dev/mapper/cryptroot")))
        );
        assert_eq!(
            probe(&ctx, &crypt(&fixture, "cryptdata")).unwrap(),
            ProbeOutcome::Conflict(
                "'/dev/mapper/data' already exists and is not an encrypted mapping of '/dev/sdb'"
                    .into()
            )
        );
    }
}
