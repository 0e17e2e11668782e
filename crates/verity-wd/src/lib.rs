//! WebDriver backend: a `Driver` implementation over fantoccini, a local
//! browser launcher, and a Selenoid-compatible grid client.

pub mod driver;
pub mod grid;
pub mod launcher;

pub use driver::WdDriver;
pub use grid::SelenoidGrid;
pub use launcher::WdLauncher;
