use std::io;

/// Seam between the flow and the OS browser, so tests can substitute a
/// launcher that records or fails.
pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &str) -> io::Result<()>;
}

/// Launcher backed by the OS default-handler mechanism.
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> io::Result<()> {
        webbrowser::open(url)
    }
}
