use serde::Serialize;

use crate::decode::{BufferView, Record, RecordDecoder, decode_records};
use crate::error::QueryError;
use crate::layout::{PointerWidth, SESSION_INFO_10, SESSION_INFO_502};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionLevel {
    /// Client, user and timing; needs no special rights.
    Info10,
    /// Adds open files, flags, client type and transport; needs admin.
    Info502,
}

impl SessionLevel {
    pub fn code(self) -> u32 {
        match self {
            SessionLevel::Info10 => 10,
            SessionLevel::Info502 => 502,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            10 => Some(SessionLevel::Info10),
            502 => Some(SessionLevel::Info502),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub client: Option<String>,
    pub user: Option<String>,
    pub active_secs: u32,
    pub idle_secs: u32,
    pub open_files: Option<u32>,
    pub user_flags: Option<u32>,
    pub client_type: Option<String>,
    pub transport: Option<String>,
    /// Reverse lookup of `client`, filled in by the session query when asked.
    pub client_host: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionDecoder {
    level: SessionLevel,
    width: PointerWidth,
}

impl SessionDecoder {
    pub fn new(level: SessionLevel, width: PointerWidth) -> Self {
        Self { level, width }
    }
}

fn decode_info10(rec: &Record<'_, '_>) -> Result<SessionInfo, QueryError> {
    Ok(SessionInfo {
        client: rec.string("sesi10_cname")?,
        user: rec.string("sesi10_username")?,
        active_secs: rec.u32("sesi10_time")?,
        idle_secs: rec.u32("sesi10_idle_time")?,
        open_files: None,
        user_flags: None,
        client_type: None,
        transport: None,
        client_host: None,
    })
}

fn decode_info502(rec: &Record<'_, '_>) -> Result<SessionInfo, QueryError> {
    Ok(SessionInfo {
        client: rec.string("sesi502_cname")?,
        user: rec.string("sesi502_username")?,
        active_secs: rec.u32("sesi502_time")?,
        idle_secs: rec.u32("sesi502_idle_time")?,
        open_files: Some(rec.u32("sesi502_num_opens")?),
        user_flags: Some(rec.u32("sesi502_user_flags")?),
        client_type: rec.string("sesi502_cltype_name")?,
        transport: rec.string("sesi502_transport")?,
        client_host: None,
    })
}

impl RecordDecoder for SessionDecoder {
    type Record = SessionInfo;

    fn width(&self) -> PointerWidth {
        self.width
    }

    fn decode(&self, view: BufferView<'_>, count: usize) -> Result<Vec<SessionInfo>, QueryError> {
        match self.level {
            SessionLevel::Info10 => {
                let layout = SESSION_INFO_10.resolve(self.width);
                decode_records(view, &layout, count, decode_info10)
            }
            SessionLevel::Info502 => {
                let layout = SESSION_INFO_502.resolve(self.width);
                decode_records(view, &layout, count, decode_info502)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{SessionDecoder, SessionLevel};
    use crate::decode::{BufferView, RecordDecoder};
    use crate::layout::{PointerWidth, SESSION_INFO_10, SESSION_INFO_502};
    use crate::native::fake::BufferBuilder;

    fn session10_buffer(
        width: PointerWidth,
        base: u64,
    ) -> Result<Vec<u8>, crate::error::QueryError> {
        let layout = SESSION_INFO_10.resolve(width);
        let mut b = BufferBuilder::new(width);
        let first = b.reserve_records(&layout, 2);
        let second = first + layout.size();
        b.set_string(&layout, first, "sesi10_cname", "\\\\10.0.0.5")?;
        b.set_string(&layout, first, "sesi10_username", "alice")?;
        b.set_u32(&layout, first, "sesi10_time", 120)?;
        b.set_u32(&layout, first, "sesi10_idle_time", 7)?;
        b.set_string(&layout, second, "sesi10_cname", "\\\\10.0.0.9")?;
        b.set_string(&layout, second, "sesi10_username", "bob")?;
        b.set_u32(&layout, second, "sesi10_time", 5)?;
        b.finish(base)
    }

    #[test]
    fn decodes_level_10_records() -> Result<(), Box<dyn std::error::Error>> {
        let width = PointerWidth::W64;
        let bytes = session10_buffer(width, 0x10_0000)?;
        let view = BufferView::new(&bytes, 0x10_0000, width);
        let out = SessionDecoder::new(SessionLevel::Info10, width).decode(view, 2)?;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].client.as_deref(), Some("\\\\10.0.0.5"));
        assert_eq!(out[0].user.as_deref(), Some("alice"));
        assert_eq!(out[0].active_secs, 120);
        assert_eq!(out[0].idle_secs, 7);
        assert_eq!(out[0].open_files, None);
        assert_eq!(out[1].user.as_deref(), Some("bob"));
        assert_eq!(out[1].idle_secs, 0);
        Ok(())
    }

    #[test]
    fn same_logical_records_on_both_pointer_widths() -> Result<(), Box<dyn std::error::Error>> {
        let narrow = session10_buffer(PointerWidth::W32, 0x0040_0000)?;
        let wide = session10_buffer(PointerWidth::W64, 0x7FF6_0000_0000)?;
        assert!(narrow.len() < wide.len());
        let a = SessionDecoder::new(SessionLevel::Info10, PointerWidth::W32)
            .decode(BufferView::new(&narrow, 0x0040_0000, PointerWidth::W32), 2)?;
        let b = SessionDecoder::new(SessionLevel::Info10, PointerWidth::W64)
            .decode(BufferView::new(&wide, 0x7FF6_0000_0000, PointerWidth::W64), 2)?;
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn level_502_reads_extended_fields() -> Result<(), Box<dyn std::error::Error>> {
        let width = PointerWidth::W32;
        let layout = SESSION_INFO_502.resolve(width);
        let mut b = BufferBuilder::new(width);
        let rec = b.reserve_records(&layout, 1);
        b.set_string(&layout, rec, "sesi502_cname", "\\\\WS01")?;
        b.set_string(&layout, rec, "sesi502_username", "svc")?;
        b.set_u32(&layout, rec, "sesi502_num_opens", 3)?;
        b.set_u32(&layout, rec, "sesi502_user_flags", 1)?;
        b.set_string(&layout, rec, "sesi502_cltype_name", "Windows 10")?;
        b.set_string(&layout, rec, "sesi502_transport", "\\Device\\NetbiosSmb")?;
        let bytes = b.finish(0x2000)?;
        let out = SessionDecoder::new(SessionLevel::Info502, width)
            .decode(BufferView::new(&bytes, 0x2000, width), 1)?;
        assert_eq!(out[0].open_files, Some(3));
        assert_eq!(out[0].user_flags, Some(1));
        assert_eq!(out[0].client_type.as_deref(), Some("Windows 10"));
        assert_eq!(out[0].transport.as_deref(), Some("\\Device\\NetbiosSmb"));
        Ok(())
    }

    #[test]
    fn overstated_count_is_malformed() -> Result<(), Box<dyn std::error::Error>> {
        let width = PointerWidth::W64;
        let layout = SESSION_INFO_10.resolve(width);
        let mut b = BufferBuilder::new(width);
        b.reserve_records(&layout, 1);
        let bytes = b.finish(0x1000)?;
        let res = SessionDecoder::new(SessionLevel::Info10, width)
            .decode(BufferView::new(&bytes, 0x1000, width), 3);
        assert!(res.is_err());
        Ok(())
    }
}
