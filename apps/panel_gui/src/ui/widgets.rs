use egui::{Color32, FontId, Pos2, Sense, Shape, Stroke};
use panel_core::{
    display::{GaugeReading, Tone},
    key::{GLOW_RANGE_START, ON_RANGE_START, START_RANGE_START},
    Point, PanelView,
};
use shared::domain::{KEY_ANGLE_MAX, KEY_ANGLE_MIN, STATE_ORDER};

const DIAL_FACE: Color32 = Color32::from_rgb(38, 40, 46);
const DIAL_RIM: Color32 = Color32::from_rgb(120, 124, 132);
const KEY_BODY: Color32 = Color32::from_rgb(200, 170, 80);
const LABEL_DIM: Color32 = Color32::from_rgb(140, 140, 150);
const LABEL_LIT: Color32 = Color32::from_rgb(250, 250, 250);

pub fn to_point(pos: Pos2) -> Point {
    Point::new(f64::from(pos.x), f64::from(pos.y))
}

/// Screen position at `radius` from `center` in the key's angle convention
/// (0 = straight up, clockwise positive).
pub fn dial_point(center: Pos2, degrees: f64, radius: f32) -> Pos2 {
    let point = to_point(center).offset_at(degrees, f64::from(radius));
    egui::pos2(point.x as f32, point.y as f32)
}

pub fn tone_color(tone: Tone) -> Color32 {
    match tone {
        Tone::Off => Color32::from_rgb(150, 150, 160),
        Tone::Ready => Color32::from_rgb(90, 200, 120),
        Tone::Heating => Color32::from_rgb(240, 160, 60),
        Tone::Starting => Color32::from_rgb(240, 210, 80),
        Tone::Running => Color32::from_rgb(70, 190, 240),
        Tone::Alert => Color32::from_rgb(235, 70, 70),
    }
}

/// Paints the rotary key and returns its response plus the pivot.
pub fn key_dial(ui: &mut egui::Ui, view: &PanelView, size: f32) -> (egui::Response, Pos2) {
    let (rect, response) = ui.allocate_exact_size(egui::vec2(size, size), Sense::drag());
    let center = rect.center();
    let radius = size * 0.45;
    let painter = ui.painter();

    painter.circle_filled(center, radius, DIAL_FACE);
    painter.circle_stroke(center, radius, Stroke::new(3.0, DIAL_RIM));

    for boundary in [ON_RANGE_START, GLOW_RANGE_START, START_RANGE_START] {
        painter.line_segment(
            [
                dial_point(center, boundary, radius * 0.9),
                dial_point(center, boundary, radius),
            ],
            Stroke::new(1.5, DIAL_RIM),
        );
    }
    let travel: Vec<Pos2> = (0..=24)
        .map(|step| {
            let degrees = KEY_ANGLE_MIN + (KEY_ANGLE_MAX - KEY_ANGLE_MIN) * f64::from(step) / 24.0;
            dial_point(center, degrees, radius * 0.95)
        })
        .collect();
    painter.add(Shape::line(travel, Stroke::new(1.0, DIAL_RIM)));

    for state in STATE_ORDER {
        let lit = view.key_state == state;
        painter.text(
            dial_point(center, state.reference_angle(), radius * 0.78),
            egui::Align2::CENTER_CENTER,
            state.label(),
            FontId::proportional(if lit { 15.0 } else { 13.0 }),
            if lit { LABEL_LIT } else { LABEL_DIM },
        );
    }

    let key_color = if view.flags.dragging || response.hovered() {
        KEY_BODY.gamma_multiply(1.2)
    } else {
        KEY_BODY
    };
    painter.line_segment(
        [
            dial_point(center, view.key_angle + 180.0, radius * 0.25),
            dial_point(center, view.key_angle, radius * 0.6),
        ],
        Stroke::new(14.0, key_color),
    );
    painter.circle_filled(center, radius * 0.16, key_color);
    painter.circle_filled(
        dial_point(center, view.key_angle, radius * 0.6),
        7.0,
        key_color,
    );

    (response, center)
}

/// Half-dial gauge with the needle from the view model.
pub fn gauge(ui: &mut egui::Ui, reading: &GaugeReading, size: f32) {
    let (rect, _) = ui.allocate_exact_size(egui::vec2(size, size * 0.7), Sense::hover());
    let center = egui::pos2(rect.center().x, rect.top() + size * 0.5);
    let radius = size * 0.42;
    let painter = ui.painter();

    let arc: Vec<Pos2> = (-18..=18)
        .map(|step| dial_point(center, f64::from(step) * 5.0, radius))
        .collect();
    painter.add(Shape::line(arc, Stroke::new(3.0, DIAL_RIM)));
    painter.line_segment(
        [center, dial_point(center, reading.needle, radius * 0.9)],
        Stroke::new(2.5, Color32::from_rgb(235, 90, 60)),
    );
    painter.circle_filled(center, 4.0, DIAL_RIM);
    painter.text(
        egui::pos2(center.x, center.y + 4.0),
        egui::Align2::CENTER_TOP,
        format!("{:.1} {}", reading.value, reading.unit),
        FontId::monospace(12.0),
        LABEL_LIT,
    );
    painter.text(
        egui::pos2(center.x, rect.top()),
        egui::Align2::CENTER_TOP,
        reading.name.replace('_', " ").to_uppercase(),
        FontId::proportional(11.0),
        LABEL_DIM,
    );
}

pub fn lamp(ui: &mut egui::Ui, label: &str, lit: bool, color: Color32) {
    ui.vertical(|ui| {
        let (rect, _) = ui.allocate_exact_size(egui::vec2(18.0, 18.0), Sense::hover());
        let fill = if lit { color } else { color.gamma_multiply(0.2) };
        ui.painter().circle_filled(rect.center(), 8.0, fill);
        ui.small(label);
    });
}
