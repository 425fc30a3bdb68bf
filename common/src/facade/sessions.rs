use crate::decode::session::{SessionDecoder, SessionInfo, SessionLevel};
use crate::error::QueryError;
use crate::facade::{TargetReport, for_each_target};
use crate::native::SessionNative;
use crate::negotiate::Negotiator;
use crate::resolve::HostResolver;

/// Sessions open on `server` (local machine for `None`).
#[allow(clippy::missing_errors_doc)]
pub fn query_sessions<N>(
    native: &N,
    server: Option<&str>,
    level: SessionLevel,
) -> Result<Vec<SessionInfo>, QueryError>
where
    N: SessionNative + ?Sized,
{
    let negotiator = Negotiator::new(native.allocator());
    let decoder = SessionDecoder::new(level, native.pointer_width());
    let sessions = negotiator.query(
        "NetSessionEnum",
        |buffer| native.net_session_enum(server, level.code(), buffer),
        &decoder,
    )?;
    tracing::debug!(server = server.unwrap_or("local"), count = sessions.len(), "sessions decoded");
    Ok(sessions)
}

/// Fills `client_host` for every session with a client address.
pub fn resolve_clients<R>(sessions: &mut [SessionInfo], resolver: &mut R)
where
    R: HostResolver + ?Sized,
{
    for session in sessions {
        session.client_host = session.client.as_deref().map(|c| resolver.resolve(c));
    }
}

pub fn query_sessions_batch<N>(
    native: &N,
    targets: &[String],
    level: SessionLevel,
    mut resolver: Option<&mut dyn HostResolver>,
) -> Vec<TargetReport<Vec<SessionInfo>>>
where
    N: SessionNative + ?Sized,
{
    for_each_target(targets, |host| {
        let mut sessions = query_sessions(native, host, level)?;
        if let Some(r) = resolver.as_mut() {
            resolve_clients(&mut sessions, &mut **r);
        }
        Ok(sessions)
    })
}

#[cfg(test)]
mod tests {
    use super::{query_sessions, query_sessions_batch};
    use crate::decode::session::SessionLevel;
    use crate::layout::{PointerWidth, SESSION_INFO_10};
    use crate::native::fake::{BufferBuilder, FakeNative, Script};
    use crate::resolve::{HostResolver, StaticResolver, UNRESOLVED};

    fn sessions(users: &'static [(&'static str, &'static str)]) -> Script {
        Script::adopted(users.len(), move |base| {
            let width = PointerWidth::native();
            let layout = SESSION_INFO_10.resolve(width);
            let mut b = BufferBuilder::new(width);
            let first = b.reserve_records(&layout, users.len());
            for (i, (client, user)) in users.iter().enumerate() {
                let rec = first + i * layout.size();
                b.set_string(&layout, rec, "sesi10_cname", client)?;
                b.set_string(&layout, rec, "sesi10_username", user)?;
            }
            b.finish(base)
        })
    }

    #[test]
    fn callee_allocated_sessions_take_one_call() -> Result<(), Box<dyn std::error::Error>> {
        let mut fake = FakeNative::new();
        fake.script(
            "NetSessionEnum",
            "local:10",
            sessions(&[("\\\\10.0.0.5", "alice"), ("\\\\10.0.0.7", "bob")]),
        );
        let out = query_sessions(&fake, None, SessionLevel::Info10)?;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].user.as_deref(), Some("alice"));
        assert_eq!(fake.call_count("NetSessionEnum"), 1);
        assert_eq!(fake.callee().allocations(), 1);
        assert_eq!(fake.callee().releases(), 1);
        assert_eq!(fake.local().allocations(), 0);
        Ok(())
    }

    #[test]
    fn batch_isolates_denied_host_and_resolves_clients() {
        let mut fake = FakeNative::new();
        fake.script("NetSessionEnum", "srv01:10", sessions(&[("\\\\10.0.0.5", "alice")]))
            .script("NetSessionEnum", "srv03:10", sessions(&[("\\\\10.0.0.9", "carol")]))
            .deny_host("srv02");
        let mut resolver = StaticResolver::new([("10.0.0.5", "ws05.corp.example")]);
        let targets = vec!["srv01".to_string(), "srv02".to_string(), "srv03".to_string()];
        let reports = query_sessions_batch(
            &fake,
            &targets,
            SessionLevel::Info10,
            Some(&mut resolver as &mut dyn HostResolver),
        );

        assert_eq!(reports.len(), 3);
        let first = reports[0].outcome.as_ref().map(|s| s[0].client_host.clone());
        assert_eq!(first.ok().flatten().as_deref(), Some("ws05.corp.example"));
        assert!(matches!(
            reports[1].outcome,
            Err(crate::error::QueryError::Failure { code: 5, .. })
        ));
        let third = reports[2].outcome.as_ref().map(|s| s[0].client_host.clone());
        assert_eq!(third.ok().flatten().as_deref(), Some(UNRESOLVED));
        assert_eq!(fake.callee().outstanding(), 0);
    }
}
