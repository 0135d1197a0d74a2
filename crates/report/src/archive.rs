//! Extraction of a job's build reports archive, feeding every materialized
//! path to the classifier.

use std::{
    fs,
    io::{Cursor, Read},
    path::Path,
};

use anyhow::{bail, Context, Result};

use crate::classify::BuildReportsBuilder;

/// Some producers wrap the real archive in an outer zip under this name.
pub const NESTED_ZIP_FILE_NAME: &str = "build-reports.zip";

/// Extract a zip archive into `destination`, reporting every extracted path
/// to `builder` in discovery order.
///
/// An entry resolving outside `destination` fails the whole archive; that is
/// a crafted artifact, not a recoverable condition. An entry named
/// [`NESTED_ZIP_FILE_NAME`] is treated as the real archive and extracted
/// into the same destination in place of the remaining entries.
pub fn unzip_into(bytes: &[u8], destination: &Path, builder: &mut BuildReportsBuilder) -> Result<()> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).context("Failed to open zip archive")?;
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let Some(relative) = file.enclosed_name() else {
            bail!("Entry is outside of the target directory: {}", file.name());
        };
        let path = destination.join(relative);
        if file.is_dir() {
            fs::create_dir_all(&path)
                .with_context(|| format!("Failed to create directory {}", path.display()))?;
        } else if file.name() == NESTED_ZIP_FILE_NAME {
            let mut nested = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut nested)?;
            return unzip_into(&nested, destination, builder);
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {}", parent.display()))?;
            }
            let mut out = fs::File::create(&path)
                .with_context(|| format!("Failed to create file {}", path.display()))?;
            std::io::copy(&mut file, &mut out)?;
        }
        builder.add_path(&path);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    use super::*;

    fn make_zip(entries: &[(&str, Option<&[u8]>)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for (name, contents) in entries {
            match contents {
                Some(contents) => {
                    writer.start_file(*name, options).unwrap();
                    writer.write_all(contents).unwrap();
                }
                None => {
                    writer.add_directory(*name, options).unwrap();
                }
            }
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn extracts_files_and_classifies() {
        let tmp = tempfile::tempdir().unwrap();
        let zip = make_zip(&[
            ("target", None),
            ("target/build-report.json", Some(br#"{"projectReports":[]}"#)),
            ("core/target/surefire-reports", None),
            (
                "core/target/surefire-reports/TEST-org.acme.FooTest.xml",
                Some(b"<testsuite name=\"org.acme.FooTest\"/>"),
            ),
        ]);
        let mut builder = BuildReportsBuilder::new(tmp.path().to_path_buf());
        unzip_into(&zip, tmp.path(), &mut builder).unwrap();
        let reports = builder.build();
        assert!(reports.build_report_path.is_some());
        assert_eq!(reports.test_results_paths.len(), 1);
        assert!(tmp
            .path()
            .join("core/target/surefire-reports/TEST-org.acme.FooTest.xml")
            .is_file());
    }

    #[test]
    fn rejects_path_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        let zip = make_zip(&[("../evil.txt", Some(b"boom"))]);
        let mut builder = BuildReportsBuilder::new(tmp.path().to_path_buf());
        let err = unzip_into(&zip, tmp.path(), &mut builder).unwrap_err();
        assert!(err.to_string().contains("outside of the target directory"));
        assert!(!tmp.path().parent().unwrap().join("evil.txt").exists());
    }

    #[test]
    fn recurses_into_nested_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let inner = make_zip(&[("target/build-report.json", Some(br#"{"projectReports":[]}"#))]);
        let outer = make_zip(&[
            (NESTED_ZIP_FILE_NAME, Some(inner.as_slice())),
            // entries after the nested archive are ignored, matching the
            // producer which only ever wraps a single archive
            ("ignored.txt", Some(b"ignored")),
        ]);
        let mut builder = BuildReportsBuilder::new(tmp.path().to_path_buf());
        unzip_into(&outer, tmp.path(), &mut builder).unwrap();
        let reports = builder.build();
        assert!(reports.build_report_path.is_some());
        assert!(!tmp.path().join("ignored.txt").exists());
        assert!(!tmp.path().join(NESTED_ZIP_FILE_NAME).exists());
    }
}
