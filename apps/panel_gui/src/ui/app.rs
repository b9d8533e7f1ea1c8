use std::{sync::Arc, time::Duration};

use egui::{Color32, RichText};
use panel_core::{PanelController, PanelView};
use tokio::runtime::Runtime;
use tracing::warn;

use super::widgets;

const DIAL_SIZE: f32 = 280.0;
const GAUGE_SIZE: f32 = 130.0;
const REPAINT_INTERVAL: Duration = Duration::from_millis(50);

pub struct PanelApp {
    controller: Arc<PanelController>,
    dragging: bool,
    demo_button_held: bool,
    // keeps the controller's timers and requests alive
    _runtime: Runtime,
}

impl PanelApp {
    pub fn new(controller: Arc<PanelController>, runtime: Runtime) -> Self {
        Self {
            controller,
            dragging: false,
            demo_button_held: false,
            _runtime: runtime,
        }
    }

    fn press(&self, action: &str) {
        if let Err(err) = self.controller.press(action) {
            warn!(action, %err, "button action refused");
        }
    }

    fn show_status_bar(&self, ui: &mut egui::Ui, view: &PanelView) {
        ui.horizontal(|ui| {
            ui.label(
                RichText::new(&view.headline)
                    .size(22.0)
                    .strong()
                    .color(widgets::tone_color(view.tone)),
            );
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if view.demo_active {
                    ui.label(RichText::new("DEMO").strong().color(Color32::LIGHT_BLUE));
                }
                let (link, color) = if view.connection_error {
                    ("offline", Color32::LIGHT_RED)
                } else {
                    ("online", Color32::LIGHT_GREEN)
                };
                ui.label(RichText::new(link).color(color));
                if let Some(at) = view.last_update {
                    ui.small(format!("updated {}", at.format("%H:%M:%S")));
                }
            });
        });
        ui.label(&view.detail);
        if let Some(alert) = &view.alert {
            ui.colored_label(Color32::LIGHT_RED, alert);
        }
    }

    fn show_key(&mut self, ui: &mut egui::Ui, view: &PanelView) {
        let (response, center) = widgets::key_dial(ui, view, DIAL_SIZE);
        let pivot = widgets::to_point(center);

        if response.drag_started() {
            if let Some(pos) = response.interact_pointer_pos() {
                self.dragging = self.controller.pointer_down(widgets::to_point(pos), pivot);
            }
        } else if self.dragging && response.dragged() {
            if let Some(pos) = response.interact_pointer_pos() {
                self.controller.pointer_move(widgets::to_point(pos), pivot);
            }
        }
        if self.dragging && response.drag_stopped() {
            self.dragging = false;
            self.controller.pointer_up();
        }

        ui.horizontal(|ui| {
            ui.label("Glow countdown:");
            ui.monospace(&view.countdown);
        });
    }

    fn show_instruments(&self, ui: &mut egui::Ui, view: &PanelView) {
        egui::Grid::new("gauges").num_columns(3).show(ui, |ui| {
            for (index, reading) in view.gauges.iter().enumerate() {
                widgets::gauge(ui, reading, GAUGE_SIZE);
                if index % 3 == 2 {
                    ui.end_row();
                }
            }
        });
        ui.add_space(8.0);
        ui.horizontal(|ui| {
            let lights = view.lights;
            widgets::lamp(ui, "ENGINE", lights.engine, Color32::RED);
            widgets::lamp(ui, "OIL", lights.oil, Color32::RED);
            widgets::lamp(ui, "TEMP", lights.temperature, Color32::RED);
            widgets::lamp(ui, "BATT", lights.battery, Color32::from_rgb(240, 160, 60));
            widgets::lamp(ui, "GLOW", lights.glow, Color32::from_rgb(240, 160, 60));
            widgets::lamp(ui, "READY", lights.ready, Color32::GREEN);
            widgets::lamp(ui, "LIGHTS", lights.work_lights, Color32::LIGHT_BLUE);
        });
        if view.sleep_mode_enabled {
            match view.time_until_sleep {
                Some(secs) => ui.small(format!("Sleep in {secs}s")),
                None => ui.small("Sleep mode on"),
            };
        }
    }

    fn show_buttons(&mut self, ui: &mut egui::Ui, view: &PanelView) {
        ui.horizontal(|ui| {
            let stop = egui::Button::new(RichText::new("EMERGENCY STOP").strong())
                .fill(Color32::from_rgb(170, 30, 30));
            if ui.add(stop).clicked() {
                self.press("emergency_stop");
            }
            if ui.button(if view.lights_on { "LIGHTS OFF" } else { "LIGHTS ON" }).clicked() {
                self.press("lights");
            }
            if ui.button("HORN").clicked() {
                self.press("horn");
            }
            let sleep_label = if view.sleep_mode_enabled {
                "SLEEP MODE: ON"
            } else {
                "SLEEP MODE: OFF"
            };
            if ui.button(sleep_label).clicked() {
                self.press("toggle_sleep_mode");
            }
            if ui.button("SLEEP NOW").clicked() {
                self.press("sleep_now");
            }

            let demo = ui
                .button(if view.demo_active { "DEMO (hold to stop)" } else { "DEMO (hold 3s)" })
                .on_hover_text("Press and hold to toggle demo playback");
            let held = demo.is_pointer_button_down_on();
            if held && !self.demo_button_held {
                self.controller.demo_button_down();
            } else if !held && self.demo_button_held {
                self.controller.demo_button_up();
            }
            self.demo_button_held = held;
        });
    }
}

impl eframe::App for PanelApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let view = self.controller.view();

        egui::TopBottomPanel::top("status").show(ctx, |ui| {
            self.show_status_bar(ui, &view);
        });
        egui::TopBottomPanel::bottom("buttons").show(ctx, |ui| {
            ui.add_space(6.0);
            self.show_buttons(ui, &view);
            ui.add_space(6.0);
        });
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.horizontal_top(|ui| {
                ui.vertical(|ui| self.show_key(ui, &view));
                ui.separator();
                ui.vertical(|ui| self.show_instruments(ui, &view));
            });
        });

        ctx.request_repaint_after(REPAINT_INTERVAL);
    }
}

impl Drop for PanelApp {
    fn drop(&mut self) {
        self.controller.stop();
    }
}
