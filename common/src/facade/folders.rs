use serde::Serialize;
use uuid::Uuid;

use crate::error::QueryError;
use crate::facade::TargetReport;
use crate::guid;
use crate::names;
use crate::native::FolderNative;
use crate::negotiate::Negotiator;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderPath {
    pub name: Option<&'static str>,
    #[serde(serialize_with = "guid::serialize")]
    pub id: Uuid,
    pub path: String,
}

/// Folder ID for a well-known name or a literal `{GUID}`.
#[allow(clippy::missing_errors_doc)]
pub fn folder_id(name: &str) -> Result<Uuid, QueryError> {
    names::known_folder(name)
        .or_else(|| guid::parse(name))
        .ok_or_else(|| QueryError::InvalidArgument {
            message: format!("未知的已知文件夹: {name}"),
        })
}

#[allow(clippy::missing_errors_doc)]
pub fn query_folder<N>(native: &N, name: &str) -> Result<FolderPath, QueryError>
where
    N: FolderNative + ?Sized,
{
    const CALL: &str = "SHGetKnownFolderPath";
    let id = folder_id(name)?;
    let negotiator = Negotiator::new(native.allocator());
    let buffer = negotiator
        .query_single(CALL, |buffer| native.known_folder_path(&id, buffer))?
        .ok_or_else(|| QueryError::malformed(CALL, "调用成功但没有返回路径"))?;
    let path = buffer.view(native.pointer_width()).wide_cstr_at(0, CALL)?;
    Ok(FolderPath {
        name: names::known_folder_name(&id),
        id,
        path,
    })
}

/// Resolves each name in order; one unknown or failing folder does not stop
/// the rest.
pub fn query_folders<N>(native: &N, names: &[String]) -> Vec<TargetReport<FolderPath>>
where
    N: FolderNative + ?Sized,
{
    names
        .iter()
        .map(|name| {
            let outcome = query_folder(native, name);
            if let Err(err) = &outcome {
                tracing::warn!(
                    folder = %name,
                    code = %err.code(),
                    error = %err,
                    "folder lookup failed"
                );
            }
            TargetReport {
                target: name.clone(),
                outcome,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{folder_id, query_folder, query_folders};
    use crate::error::QueryError;
    use crate::guid;
    use crate::names;
    use crate::native::fake::{FakeNative, folder_path_script};

    #[test]
    fn names_and_literal_guids_resolve() -> Result<(), Box<dyn std::error::Error>> {
        let downloads = folder_id("downloads")?;
        assert_eq!(guid::braced(&downloads), "{374DE290-123F-4565-9164-39C4925E467B}");
        assert_eq!(folder_id("{374de290-123f-4565-9164-39c4925e467b}")?, downloads);
        assert!(matches!(
            folder_id("NotAFolder"),
            Err(QueryError::InvalidArgument { .. })
        ));
        Ok(())
    }

    #[test]
    fn path_is_copied_and_callee_block_freed() -> Result<(), Box<dyn std::error::Error>> {
        let mut fake = FakeNative::new();
        let id = names::known_folder("Windows").ok_or("missing")?;
        fake.script("SHGetKnownFolderPath", &id.to_string(), folder_path_script("C:\\Windows"));

        let folder = query_folder(&fake, "Windows")?;
        assert_eq!(folder.path, "C:\\Windows");
        assert_eq!(folder.name, Some("Windows"));
        assert_eq!(fake.call_count("SHGetKnownFolderPath"), 1);
        assert_eq!(fake.callee().allocations(), 1);
        assert_eq!(fake.callee().outstanding(), 0);
        Ok(())
    }

    #[test]
    fn failures_are_reported_per_folder() -> Result<(), Box<dyn std::error::Error>> {
        let mut fake = FakeNative::new();
        let id = names::known_folder("Fonts").ok_or("missing")?;
        fake.script(
            "SHGetKnownFolderPath",
            &id.to_string(),
            folder_path_script("C:\\Windows\\Fonts"),
        );
        let wanted = vec!["Fonts".to_string(), "Bogus".to_string(), "Desktop".to_string()];

        let reports = query_folders(&fake, &wanted);
        assert_eq!(reports.len(), 3);
        assert!(reports[0].is_ok());
        assert!(matches!(reports[1].outcome, Err(QueryError::InvalidArgument { .. })));
        assert!(matches!(
            reports[2].outcome,
            Err(QueryError::Failure { code: 0x8007_0002, .. })
        ));
        Ok(())
    }
}
