use crate::{
    cli::actions::connect,
    session::{SessionSnapshot, fingerprint},
};
use anyhow::Result;
use secrecy::ExposeSecret;
use serde_json::{Value, json};

/// Printable view of a snapshot. Tokens only appear as fingerprints.
#[must_use]
pub fn describe(snapshot: &SessionSnapshot) -> Value {
    let session = snapshot.session.as_ref().map(|session| {
        json!({
            "subject_id": session.subject_id(),
            "email": session.email(),
            "role": session.role(),
            "display_name": session.display_name(),
            "department": session.department(),
            "source": session.source(),
            "issued_at": session.issued_at(),
            "token": fingerprint(session.access_token().expose_secret()),
            "permissions": session.permissions().granted().map(|p| p.as_str()).collect::<Vec<_>>(),
        })
    });
    json!({ "status": snapshot.status, "session": session })
}

/// # Errors
/// Returns an error if the session manager can't be started.
pub async fn execute(args: connect::Args) -> Result<()> {
    let handle = args.spawn()?;
    let snapshot = handle.initialize().await?;
    println!("{}", serde_json::to_string_pretty(&describe(&snapshot))?);
    handle.shutdown().await?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::session::{AuthStatus, IdentityClaims, Session, SessionTokens};

    #[test]
    fn describe_hides_tokens() {
        let session = Session::authenticated(
            IdentityClaims {
                subject_id: "u-1".into(),
                email: "kai@campus.test".into(),
                role: Some("guardian".into()),
                ..Default::default()
            },
            SessionTokens::new("very-secret-token", Some("refresh-secret".into())),
        )
        .unwrap();
        let value = describe(&SessionSnapshot {
            status: AuthStatus::Authenticated,
            session: Some(session),
        });
        let text = value.to_string();
        assert!(!text.contains("very-secret-token"));
        assert!(!text.contains("refresh-secret"));
        assert_eq!(value["status"], json!("authenticated"));
        assert_eq!(value["session"]["role"], json!("guardian"));
        assert!(
            value["session"]["permissions"]
                .as_array()
                .unwrap()
                .contains(&json!("view_child_records"))
        );
    }

    #[test]
    fn describe_anonymous() {
        let value = describe(&SessionSnapshot {
            status: AuthStatus::Anonymous,
            session: None,
        });
        assert_eq!(value, json!({"status": "anonymous", "session": null}));
    }
}
