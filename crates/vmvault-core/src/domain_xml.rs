//! libvirt domain XML queries.
//!
//! Only the parts vmvault needs are read: the domain name and the backing
//! source of each `<disk>`. The document itself is never rewritten; on import
//! it is handed back to `virsh define` byte for byte.

use std::fs;
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{Error, Result};

/// Source attributes that name a disk's backing storage, in lookup order.
const SOURCE_ATTRS: [&[u8]; 3] = [b"file", b"dev", b"volume"];

/// A `<disk>` element with a backing source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskSource {
    /// `device` attribute (`disk`, `cdrom`, ...).
    pub device: String,
    /// Guest target from `<target dev=...>`, if present.
    pub target: Option<String>,
    /// Backing path from `<source file|dev|volume=...>`.
    pub path: PathBuf,
}

/// The parts of a domain definition vmvault cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainXml {
    pub name: String,
    pub disks: Vec<DiskSource>,
}

#[derive(Default)]
struct PendingDisk {
    device: String,
    target: Option<String>,
    path: Option<PathBuf>,
}

impl DomainXml {
    /// Read and parse a domain XML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::io(e, path))?;
        Self::parse(&text)
    }

    /// Parse a domain XML document.
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<String> = Vec::new();
        let mut domain = DomainXml::default();
        let mut disk: Option<PendingDisk> = None;

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    let name = local_name(&e);
                    if name == "disk" && at(&stack, &["domain", "devices"]) {
                        disk = Some(PendingDisk {
                            device: attr(&e, b"device")?.unwrap_or_else(|| "disk".to_string()),
                            ..PendingDisk::default()
                        });
                    } else {
                        disk_child(&stack, &e, &name, disk.as_mut())?;
                    }
                    stack.push(name);
                }
                Event::Empty(e) => {
                    let name = local_name(&e);
                    disk_child(&stack, &e, &name, disk.as_mut())?;
                }
                Event::Text(t) => {
                    if at(&stack, &["domain", "name"]) {
                        let text = t.unescape().map_err(|e| Error::metadata(e.to_string()))?;
                        domain.name = text.trim().to_string();
                    }
                }
                Event::End(_) => {
                    let closed = stack.pop();
                    if closed.as_deref() == Some("disk") && at(&stack, &["domain", "devices"]) {
                        if let Some(PendingDisk {
                            device,
                            target,
                            path: Some(path),
                        }) = disk.take()
                        {
                            domain.disks.push(DiskSource {
                                device,
                                target,
                                path,
                            });
                        }
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if domain.name.is_empty() {
            return Err(Error::metadata("domain XML has no <name>"));
        }
        Ok(domain)
    }

    /// Original path of the disk whose file name is exactly `file_name`.
    ///
    /// Matching is on the whole file name, never a fragment, and two sources
    /// sharing a file name are rejected as ambiguous.
    pub fn destination_for(&self, file_name: &str) -> Result<&Path> {
        let mut matches = self
            .disks
            .iter()
            .map(|d| d.path.as_path())
            .filter(|p| p.file_name().and_then(|n| n.to_str()) == Some(file_name));

        let first = matches
            .next()
            .ok_or_else(|| Error::not_found("disk source in domain XML", file_name))?;
        if let Some(other) = matches.find(|p| *p != first) {
            return Err(Error::metadata(format!(
                "'{file_name}' matches more than one disk source ({} and {})",
                first.display(),
                other.display()
            )));
        }
        Ok(first)
    }
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn at(stack: &[String], path: &[&str]) -> bool {
    stack.len() == path.len() && stack.iter().zip(path).all(|(a, b)| a == b)
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
    for attribute in e.attributes() {
        let attribute = attribute.map_err(|err| Error::metadata(err.to_string()))?;
        if attribute.key.as_ref() == key {
            let value = attribute
                .unescape_value()
                .map_err(|err| Error::metadata(err.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

/// Record `<source>` and `<target>` that are direct children of the open disk.
fn disk_child(
    stack: &[String],
    e: &BytesStart<'_>,
    name: &str,
    disk: Option<&mut PendingDisk>,
) -> Result<()> {
    let Some(disk) = disk else {
        return Ok(());
    };
    if !at(stack, &["domain", "devices", "disk"]) {
        return Ok(());
    }
    match name {
        "source" if disk.path.is_none() => {
            for key in SOURCE_ATTRS {
                if let Some(value) = attr(e, key)? {
                    disk.path = Some(PathBuf::from(value));
                    break;
                }
            }
        }
        "target" => disk.target = attr(e, b"dev")?,
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const XML: &str = r#"<domain type='kvm'>
  <name>alpha</name>
  <uuid>8c6a3c52-1f3e-4a4b-9d55-5b0a2f1c7e11</uuid>
  <devices>
    <disk type='file' device='disk'>
      <driver name='qemu' type='qcow2'/>
      <source file='/var/lib/libvirt/images/alpha.qcow2'/>
      <backingStore type='file'>
        <source file='/var/lib/libvirt/images/base.qcow2'/>
      </backingStore>
      <target dev='vda' bus='virtio'/>
    </disk>
    <disk type='file' device='cdrom'>
      <target dev='sda' bus='sata'/>
      <readonly/>
    </disk>
  </devices>
</domain>
"#;

    #[test]
    fn test_parse_name_and_disks() {
        let domain = DomainXml::parse(XML).unwrap();
        assert_eq!(domain.name, "alpha");
        assert_eq!(domain.disks.len(), 1);
        assert_eq!(domain.disks[0].device, "disk");
        assert_eq!(domain.disks[0].target.as_deref(), Some("vda"));
        assert_eq!(
            domain.disks[0].path,
            PathBuf::from("/var/lib/libvirt/images/alpha.qcow2")
        );
    }

    #[test]
    fn test_backing_store_source_is_not_a_disk() {
        let domain = DomainXml::parse(XML).unwrap();
        assert!(domain.destination_for("base.qcow2").is_err());
    }

    #[test]
    fn test_destination_matches_whole_file_name() {
        let domain = DomainXml::parse(XML).unwrap();
        assert_eq!(
            domain.destination_for("alpha.qcow2").unwrap(),
            Path::new("/var/lib/libvirt/images/alpha.qcow2")
        );
        assert!(matches!(
            domain.destination_for("pha.qcow2").unwrap_err(),
            Error::NotFound { .. }
        ));
    }

    #[test]
    fn test_missing_name_is_an_error() {
        let err = DomainXml::parse("<domain><devices/></domain>").unwrap_err();
        assert!(err.to_string().contains("no <name>"));
    }

    #[test]
    fn test_malformed_xml_is_an_error() {
        assert!(DomainXml::parse("<domain><name>alpha</domain>").is_err());
    }
}
