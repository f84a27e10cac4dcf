#![forbid(unsafe_code)]

use anyhow::Context;
use async_trait::async_trait;
use classchat_util::SecretString;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message as Email, Tokio1Executor};
use rust_embed::RustEmbed;
use tracing::info;

#[derive(RustEmbed)]
#[folder = "templates"]
struct Templates;

pub const REJECTION_SUBJECT: &str = "Team Request";

/// Outbound email collaborator.
#[async_trait]
pub trait Mailer: Send + Sync {
	async fn send_simple_mail(&self, to: &str, subject: &str, html_body: &str) -> anyhow::Result<()>;
}

/// Renders the join-rejection notice for `first_name` and group `team`.
pub fn rejection_email(first_name: &str, team: &str) -> anyhow::Result<String> {
	let file = Templates::get("rejection.html").context("rejection template missing from binary")?;
	let template = std::str::from_utf8(&file.data).context("rejection template is not utf-8")?;
	Ok(template
		.replace("{{name}}", &escape_html(first_name))
		.replace("{{team}}", &escape_html(team)))
}

fn escape_html(s: &str) -> String {
	let mut out = String::with_capacity(s.len());
	for c in s.chars() {
		match c {
			'&' => out.push_str("&amp;"),
			'<' => out.push_str("&lt;"),
			'>' => out.push_str("&gt;"),
			'"' => out.push_str("&quot;"),
			'\'' => out.push_str("&#39;"),
			c => out.push(c),
		}
	}
	out
}

pub struct SmtpMailer {
	transport: AsyncSmtpTransport<Tokio1Executor>,
	from: Mailbox,
}

impl SmtpMailer {
	pub fn new(
		host: &str,
		port: u16,
		user: Option<&str>,
		password: Option<&SecretString>,
		from: &str,
	) -> anyhow::Result<Self> {
		let from: Mailbox = from.parse().with_context(|| format!("invalid mail.from address: {from}"))?;

		let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host).port(port);
		if let (Some(user), Some(password)) = (user, password) {
			builder = builder.credentials(Credentials::new(user.to_string(), password.expose().to_string()));
		}

		Ok(Self {
			transport: builder.build(),
			from,
		})
	}
}

#[async_trait]
impl Mailer for SmtpMailer {
	async fn send_simple_mail(&self, to: &str, subject: &str, html_body: &str) -> anyhow::Result<()> {
		let to: Mailbox = to.parse().with_context(|| format!("invalid recipient: {to}"))?;
		let email = Email::builder()
			.from(self.from.clone())
			.to(to)
			.subject(subject)
			.header(ContentType::TEXT_HTML)
			.body(html_body.to_string())
			.context("build email")?;

		self.transport.send(email).await.context("smtp send")?;
		Ok(())
	}
}

/// Used when no SMTP host is configured.
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
	async fn send_simple_mail(&self, to: &str, subject: &str, html_body: &str) -> anyhow::Result<()> {
		info!(to, subject, bytes = html_body.len(), "mail (not sent, no smtp host configured)");
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejection_email_fills_and_escapes_placeholders() {
		let html = rejection_email("Ada", "Team <Rocket> & co").expect("render");
		assert!(html.contains("Hi Ada,"));
		assert!(html.contains("Team &lt;Rocket&gt; &amp; co"));
		assert!(!html.contains("{{"));
	}

	#[tokio::test]
	async fn log_mailer_always_succeeds() {
		LogMailer
			.send_simple_mail("a@example.edu", REJECTION_SUBJECT, "<p>hi</p>")
			.await
			.expect("log mailer");
	}

	#[test]
	fn smtp_mailer_rejects_bad_from_address() {
		assert!(SmtpMailer::new("localhost", 25, None, None, "not an address").is_err());
	}
}
