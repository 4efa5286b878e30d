/// Where a one-time code should be delivered.
#[derive(Debug, Clone, Copy)]
pub enum NotifyTarget<'a> {
    Phone(&'a str),
    Email(&'a str),
}

/// Delivery seam for one-time codes. The server binary installs an
/// implementation; no real SMS or email provider is wired in here.
pub trait Notifier: Send + Sync {
    fn send_code(&self, target: NotifyTarget<'_>, code: &str);
}
