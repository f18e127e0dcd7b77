use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Layout, Rect},
    prelude::Stylize,
    style::Style,
    symbols::border,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Row, Table, Tabs, Widget},
};

use crate::aggregate::Snapshot;
use crate::app::App;
use crate::engine::CurrentSnapshot;

const PAGES: [&str; 4] = ["Overview", "Nodes", "Users", "Queue"];

#[derive(Default)]
pub struct UI {
    /// Index into [`PAGES`]
    page: usize,
    /// Per-page scroll offsets
    offset: [usize; 4],
    latest: Option<CurrentSnapshot>,
    last_error: Option<String>,
    persist_failed: bool,
}

impl UI {
    pub fn new(app: &App) -> Self {
        let mut ui = Self::default();
        ui.update(app);
        ui
    }

    /// Pulls the latest published snapshot out of the engine
    pub fn update(&mut self, app: &App) {
        self.latest = app.current();
        self.last_error = app.last_error();
        self.persist_failed = app.persist_failed();
    }

    pub fn select_page(&mut self, page: usize) {
        self.page = page.min(PAGES.len() - 1);
    }

    pub fn next_page(&mut self) {
        self.page = (self.page + 1) % PAGES.len();
    }

    pub fn previous_page(&mut self) {
        self.page = (self.page + PAGES.len() - 1) % PAGES.len();
    }

    pub fn scroll(&mut self, delta: isize) {
        let offset = &mut self.offset[self.page];
        *offset = offset.saturating_add_signed(delta);
    }

    pub fn render(&mut self, area: Rect, buf: &mut Buffer) {
        let block = Block::default()
            .title_top(Line::from(" GPU Cluster Monitor ").bold().centered())
            .title_top(self.status_line().right_aligned())
            .title_bottom(UI::instructions())
            .borders(Borders::ALL)
            .border_set(border::PLAIN);

        let inner = block.inner(area);
        block.render(area, buf);

        let layout = Layout::vertical([Constraint::Length(1), Constraint::Min(0)]).split(inner);
        self.render_tabs(layout[0], buf);

        let Some(current) = self.latest.clone() else {
            // Nothing published yet; show why when collection keeps failing
            let text = match &self.last_error {
                Some(err) => Line::from(format!("collection failing: {}", err)).red(),
                None => Line::from("collecting cluster state...").italic(),
            };
            Paragraph::new(text.centered()).render(layout[1], buf);
            return;
        };

        let snapshot = &current.snapshot;
        match self.page {
            0 => self.render_overview(layout[1], buf, snapshot),
            1 => self.render_nodes(layout[1], buf, snapshot),
            2 => self.render_users(layout[1], buf, snapshot),
            _ => self.render_queue(layout[1], buf, snapshot),
        }
    }

    fn render_tabs(&self, area: Rect, buf: &mut Buffer) {
        Tabs::new(PAGES)
            .select(self.page)
            .highlight_style(Style::new().bold().reversed())
            .render(area, buf);
    }

    fn render_overview(&mut self, area: Rect, buf: &mut Buffer, snapshot: &Snapshot) {
        let heavy = snapshot.heavy_users(5);
        let users_height = (heavy.len() as u16 + 2).min(area.height / 2);
        let layout =
            Layout::vertical([Constraint::Min(3), Constraint::Length(users_height)]).split(area);

        let rows = snapshot.availability.iter().map(|row| {
            Row::new(vec![
                row.gpu_type.clone(),
                row.total.to_string(),
                row.used.to_string(),
                row.available.to_string(),
                row.true_available.to_string(),
                format!("{:.1}%", row.usage_percent()),
                format!("{}/{}", row.nodes_healthy, row.nodes_total),
            ])
        });
        self.render_table(
            layout[0],
            buf,
            &["GPU Type", "Total", "Used", "Avail", "True Avail", "Usage", "Healthy"],
            rows.collect(),
            "no GPU nodes reported",
        );

        let block = Block::default()
            .title_top(Line::from(" Heavy Users ").bold())
            .borders(Borders::TOP);
        let user_area = block.inner(layout[1]);
        block.render(layout[1], buf);

        let rows: Vec<Row> = heavy
            .iter()
            .map(|(user, gpus)| Row::new(vec![user.to_string(), format!("{} GPUs", gpus)]))
            .collect();
        if rows.is_empty() {
            Paragraph::new(Line::from("no active GPU users").italic()).render(user_area, buf);
        } else {
            Table::new(rows, [Constraint::Min(12), Constraint::Length(12)]).render(user_area, buf);
        }
    }

    fn render_nodes(&mut self, area: Rect, buf: &mut Buffer, snapshot: &Snapshot) {
        let rows = snapshot.nodes.iter().map(|row| {
            Row::new(vec![
                row.node.clone(),
                row.gpu_type.clone(),
                row.state.to_string(),
                row.gpu_total.to_string(),
                row.gpu_used.to_string(),
                row.gpu_total.saturating_sub(row.gpu_used).to_string(),
            ])
        });
        self.render_table(
            area,
            buf,
            &["Node", "GPU Type", "State", "Total", "Used", "Avail"],
            rows.collect(),
            "no GPU nodes reported",
        );
    }

    fn render_users(&mut self, area: Rect, buf: &mut Buffer, snapshot: &Snapshot) {
        let rows = snapshot.users.iter().map(|row| {
            Row::new(vec![
                row.user.clone(),
                row.gpu_type.clone(),
                row.gpu_count.to_string(),
                row.job_count.to_string(),
            ])
        });
        self.render_table(
            area,
            buf,
            &["User", "GPU Type", "GPUs", "Jobs"],
            rows.collect(),
            "no running GPU jobs",
        );
    }

    fn render_queue(&mut self, area: Rect, buf: &mut Buffer, snapshot: &Snapshot) {
        let rows = snapshot.queue.iter().map(|row| {
            Row::new(vec![
                row.gpu_type.clone(),
                row.queued_jobs.to_string(),
                row.queued_gpus.to_string(),
                format!("{:.1}", row.queued_gpu_hours),
                row.unique_users.to_string(),
            ])
        });
        self.render_table(
            area,
            buf,
            &["GPU Type", "Pending Jobs", "GPUs Requested", "GPU Hours", "Unique Users"],
            rows.collect(),
            "no pending GPU jobs",
        );
    }

    /// Renders a scrolled table, clamping the page offset to the row count
    fn render_table(
        &mut self,
        area: Rect,
        buf: &mut Buffer,
        columns: &[&'static str],
        rows: Vec<Row>,
        empty: &'static str,
    ) {
        if rows.is_empty() {
            self.offset[self.page] = 0;
            Paragraph::new(Line::from(empty).italic()).render(area, buf);
            return;
        }

        let offset = &mut self.offset[self.page];
        *offset = (*offset).min(rows.len().saturating_sub(1));

        let widths = columns
            .iter()
            .enumerate()
            .map(|(idx, column)| {
                if idx == 0 {
                    Constraint::Min(column.len().max(12) as u16)
                } else {
                    Constraint::Length(column.len().max(6) as u16 + 2)
                }
            })
            .collect::<Vec<_>>();

        Table::new(rows.into_iter().skip(*offset), widths)
            .column_spacing(2)
            .header(Row::new(columns.to_vec()).bold())
            .render(area, buf);
    }

    fn status_line(&self) -> Line<'static> {
        let Some(current) = &self.latest else {
            return Line::from(" collecting ".italic());
        };

        let mut spans: Vec<Span<'static>> = vec![
            format!(" {} GPUs free ", current.snapshot.total_true_available()).bold(),
            format!(" updated {} ago ", fmt_age(current.age_secs())).into(),
        ];

        if current.stale {
            spans.push(" STALE ".bold().red());
        }

        let warnings = current.snapshot.warnings.len();
        if warnings > 0 {
            spans.push(format!(" {} parse warnings ", warnings).yellow());
        }

        if self.persist_failed {
            spans.push(" db write failing ".yellow());
        }

        Line::from(spans)
    }

    fn instructions() -> Line<'static> {
        Line::from(vec![
            " <1-4> ".bold(),
            "Pages".into(),
            " <R> ".bold(),
            "Refresh".into(),
            " <Q> ".bold(),
            "Quit ".into(),
        ])
        .centered()
    }
}

fn fmt_age(secs: i64) -> String {
    if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}
