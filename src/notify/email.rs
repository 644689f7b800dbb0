use anyhow::{anyhow, Context, Result};
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use super::{NotificationEvent, Notifier};

const REQUIRED_VARS: [&str; 5] = [
    "SMTP_HOST",
    "SMTP_USER",
    "SMTP_PASS",
    "NOTIFY_EMAIL_FROM",
    "NOTIFY_EMAIL_TO",
];

pub struct EmailSender {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl EmailSender {
    /// `Ok(None)` when none of the SMTP variables are set, an error when
    /// they are only partially set or unparsable.
    pub fn from_env() -> Result<Option<Self>> {
        let vals: Vec<Option<String>> = REQUIRED_VARS
            .iter()
            .map(|k| std::env::var(k).ok().filter(|v| !v.trim().is_empty()))
            .collect();
        if vals.iter().all(Option::is_none) {
            return Ok(None);
        }
        let missing: Vec<&str> = REQUIRED_VARS
            .iter()
            .zip(&vals)
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| *k)
            .collect();
        if !missing.is_empty() {
            return Err(anyhow!("missing {}", missing.join(", ")));
        }
        let [host, user, pass, from_addr, to_addr] = <[Option<String>; 5]>::try_from(vals)
            .map_err(|_| anyhow!("unexpected SMTP settings shape"))?
            .map(Option::unwrap_or_default);

        let creds = Credentials::new(user, pass);
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
            .context("invalid SMTP_HOST")?
            .credentials(creds)
            .build();

        let from = from_addr.parse::<Mailbox>().context("invalid NOTIFY_EMAIL_FROM")?;
        let to = to_addr.parse::<Mailbox>().context("invalid NOTIFY_EMAIL_TO")?;

        Ok(Some(Self { mailer, from, to }))
    }

    fn render(ev: &NotificationEvent) -> (String, String) {
        let subject = ev.headline();
        let body = format!(
            "Rule: {}\nTitle: {}\nLink: {}\nSource: {}\nConfidence: {:.2}\nKeywords: {}\n\n{}\n\nMatched at: {}\n",
            ev.rule,
            ev.title,
            ev.link,
            ev.source,
            ev.confidence,
            ev.keywords.join(", "),
            ev.snippet,
            ev.ts.to_rfc3339()
        );
        (subject, body)
    }
}

#[async_trait::async_trait]
impl Notifier for EmailSender {
    fn channel(&self) -> &'static str {
        "email"
    }

    async fn send(&self, ev: &NotificationEvent) -> Result<()> {
        let (subject, body) = Self::render(ev);
        let msg = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(subject)
            .header(header::ContentType::TEXT_PLAIN)
            .body(body)
            .context("build email")?;

        self.mailer.send(msg).await.context("send email")?;
        Ok(())
    }
}
