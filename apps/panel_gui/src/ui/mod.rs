//! UI layer: the app shell and the dial/gauge widgets it paints.

pub mod app;
pub mod widgets;

pub use app::PanelApp;
