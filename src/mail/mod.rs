//! Out-of-band delivery of verification emails.
//!
//! Request handlers only push onto [`MailQueue`]; a single worker task owns the
//! transport, so a slow SMTP server never holds up an HTTP response.

mod transport;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub use transport::{LogMailer, Mailer, SmtpMailer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationEmail {
    pub email: String,
    pub username: String,
    pub token: String,
}

#[derive(Clone)]
pub struct MailQueue {
    tx: mpsc::UnboundedSender<VerificationEmail>,
}

impl MailQueue {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<VerificationEmail>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Fire-and-forget. A closed worker is logged, never surfaced to the caller.
    pub fn enqueue(&self, msg: VerificationEmail) {
        let to = msg.email.clone();
        if self.tx.send(msg).is_err() {
            warn!(to = %to, "mail worker gone; verification email dropped");
        } else {
            debug!(to = %to, "verification email queued");
        }
    }
}

/// Spawns the delivery worker and returns the queue feeding it.
pub fn spawn_worker(mailer: Arc<dyn Mailer>, base_url: String) -> MailQueue {
    let (queue, mut rx) = MailQueue::channel();
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let html = render_verification(&base_url, &msg);
            match mailer
                .send_html(&msg.email, "Confirm your email", html)
                .await
            {
                Ok(()) => info!(to = %msg.email, "verification email sent"),
                Err(e) => warn!(to = %msg.email, error = %format!("{e:#}"), "verification email failed"),
            }
        }
        debug!("mail worker stopped");
    });
    queue
}

pub fn verification_link(base_url: &str, token: &str) -> String {
    format!("{}/api/auth/confirmed_email/{}", base_url.trim_end_matches('/'), token)
}

fn render_verification(base_url: &str, msg: &VerificationEmail) -> String {
    let link = verification_link(base_url, &msg.token);
    format!(
        r#"<!DOCTYPE html>
<html>
  <body>
    <p>Hi {username},</p>
    <p>Thanks for signing up for Contact Book. Please confirm your email address:</p>
    <p><a href="{link}">Confirm email</a></p>
    <p>If you did not create an account, you can ignore this message.</p>
  </body>
</html>
"#,
        username = escape_html(&msg.username),
        link = link,
    )
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
