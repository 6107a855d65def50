//! Tasks (schedule table; run, toggle and duplicate the selected task)
//! Details (every field of the selected task)

use std::{
  error::Error,
  io,
  time::{Duration, Instant},
};

use command_center::{
  client::ApiClient,
  config::Config,
  console::{Console, ConsoleEvent},
  discovery::GossipDiscovery,
  models::{format_timestamp, ScheduledTask},
};
use crossterm::{
  event::{self, DisableMouseCapture, EnableMouseCapture, Event as CEvent, KeyCode},
  execute,
  terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use tokio::{runtime::Runtime, sync::mpsc};
use tui::{
  backend::{Backend, CrosstermBackend},
  layout::{Constraint, Direction, Layout, Rect},
  style::{Color, Modifier, Style},
  text::{Span, Spans},
  widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState, Tabs},
  Terminal,
};

const SPINNER_FRAMES: [&str; 4] = ["|", "/", "-", "\\"];

#[derive(Clone, Copy)]
enum DashboardTab {
  Tasks,
  Details,
}

struct Status {
  text: String,
  is_error: bool,
  set_at: Instant,
}

struct App {
  current_tab: DashboardTab,
  tasks: Vec<ScheduledTask>,
  table_state: TableState,
  service_url: Option<String>,
  status: Option<Status>,
  spinner_index: usize,
}

impl App {
  fn new() -> Self {
    Self {
      current_tab: DashboardTab::Tasks,
      tasks: vec![],
      table_state: TableState::default(),
      service_url: None,
      status: None,
      spinner_index: 0,
    }
  }

  fn next_tab(&mut self) {
    self.current_tab = match self.current_tab {
      DashboardTab::Tasks => DashboardTab::Details,
      DashboardTab::Details => DashboardTab::Tasks,
    }
  }

  fn select_offset(&mut self, offset: isize) {
    if self.tasks.is_empty() {
      self.table_state.select(None);
      return;
    }
    let last = self.tasks.len() as isize - 1;
    let current = self.table_state.selected().map(|i| i as isize).unwrap_or(0);
    self.table_state.select(Some((current + offset).clamp(0, last) as usize));
  }

  fn selected(&self) -> Option<&ScheduledTask> {
    self.table_state.selected().and_then(|i| self.tasks.get(i))
  }

  fn replace_tasks(&mut self, tasks: Vec<ScheduledTask>) {
    self.tasks = tasks;
    let selection = match self.table_state.selected() {
      _ if self.tasks.is_empty() => None,
      Some(i) if i < self.tasks.len() => Some(i),
      _ => Some(0),
    };
    self.table_state.select(selection);
  }

  fn set_status(&mut self, text: impl Into<String>) {
    self.status = Some(Status { text: text.into(), is_error: false, set_at: Instant::now() });
  }

  fn set_error(&mut self, text: impl Into<String>) {
    self.status = Some(Status { text: text.into(), is_error: true, set_at: Instant::now() });
  }

  fn clear_stale_status(&mut self, delay: Duration, busy: bool) {
    if busy {
      return;
    }
    if self.status.as_ref().is_some_and(|s| s.set_at.elapsed() >= delay) {
      self.status = None;
    }
  }

  fn on_event(&mut self, event: ConsoleEvent) {
    match event {
      ConsoleEvent::TasksReplaced(tasks) => {
        self.replace_tasks(tasks);
        self.set_status("Refreshed.");
      }
      ConsoleEvent::RefreshFailed(message)
      | ConsoleEvent::OperationFailed(message)
      | ConsoleEvent::Error(message) => self.set_error(message),
      ConsoleEvent::RunResult { ok, message } => {
        self.set_status(format!("{}: {}", if ok { "OK" } else { "ERR" }, message));
      }
      ConsoleEvent::SaveResult { ok: true, message, creating } => {
        self.set_status(format!("{}: {}", if creating { "Created" } else { "Updated" }, message));
      }
      ConsoleEvent::SaveResult { ok: false, message, .. } => self.set_error(message),
      ConsoleEvent::ServiceUrlChanged(url) => self.service_url = Some(url),
    }
  }
}

fn main() -> Result<(), Box<dyn Error>> {
  let config = Config::from_env();
  let rt = Runtime::new()?;
  let _guard = rt.enter();

  let (discovery_tx, mut discovery_rx) = mpsc::unbounded_channel();
  let mut discovery = GossipDiscovery::new(discovery_tx);
  // Bind failures arrive on the discovery channel; the console keeps running.
  let _ = rt.block_on(discovery.start(&config.gossip_bind, config.gossip_port));

  let (event_tx, mut event_rx) = mpsc::unbounded_channel();
  let mut console = Console::new(ApiClient::new(config.http_timeout), event_tx);

  enable_raw_mode()?;
  let mut stdout = io::stdout();
  execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
  let backend = CrosstermBackend::new(stdout);
  let mut terminal = Terminal::new(backend)?;

  let mut app = App::new();
  if !console.refresh() {
    app.set_status("Waiting for service discovery...");
  }

  let tick_rate = Duration::from_millis(100);
  let mut last_tick = Instant::now();
  let mut last_refresh = Instant::now();

  loop {
    while let Ok(event) = discovery_rx.try_recv() {
      console.on_discovery(event);
    }
    while let Ok(event) = event_rx.try_recv() {
      console.apply(&event);
      app.on_event(event);
    }
    if last_refresh.elapsed() >= config.refresh_interval {
      last_refresh = Instant::now();
      console.refresh();
    }
    app.clear_stale_status(config.status_clear_delay, console.is_busy());

    let busy = console.is_busy();
    terminal.draw(|f| ui(f, &mut app, busy))?;

    let timeout = tick_rate
      .checked_sub(last_tick.elapsed())
      .unwrap_or_else(|| Duration::from_secs(0));
    if event::poll(timeout)? {
      if let CEvent::Key(key) = event::read()? {
        match key.code {
          KeyCode::Char('q') => break,
          KeyCode::Right | KeyCode::Left | KeyCode::Tab => app.next_tab(),
          KeyCode::Down => app.select_offset(1),
          KeyCode::Up => app.select_offset(-1),
          KeyCode::Char('r') => {
            if !console.refresh() && console.has_pending_refresh() {
              app.set_status("Waiting for service discovery...");
            }
          }
          KeyCode::Enter | KeyCode::Char('x') => match app.selected().cloned() {
            Some(task) => console.run_now(&task),
            None => app.set_error("No task selected"),
          },
          KeyCode::Char('e') => match app.selected().cloned() {
            Some(mut task) => {
              task.enabled = !task.enabled;
              console.save(task);
            }
            None => app.set_error("No task selected"),
          },
          KeyCode::Char('d') => match app.selected().cloned() {
            Some(task) => console.save(ScheduledTask {
              id: None,
              name: format!("{} (copy)", task.name),
              ..task
            }),
            None => app.set_error("No task selected"),
          },
          _ => {}
        }
      }
    }
    if last_tick.elapsed() >= tick_rate {
      last_tick = Instant::now();
      if busy {
        app.spinner_index = (app.spinner_index + 1) % SPINNER_FRAMES.len();
      }
    }
  }

  disable_raw_mode()?;
  execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
  terminal.show_cursor()?;
  Ok(())
}

fn ui<B: Backend>(f: &mut tui::Frame<B>, app: &mut App, busy: bool) {
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .margin(1)
    .constraints([
      Constraint::Length(3),
      Constraint::Min(0),
      Constraint::Length(3),
    ].as_ref())
    .split(f.size());

  let service = app.service_url.as_deref().unwrap_or("not discovered");
  let tab_titles = vec!["Tasks", "Details"];
  let tabs = Tabs::new(
    tab_titles
      .iter()
      .map(|t| Spans::from(Span::styled(*t, Style::default().fg(Color::Yellow))))
      .collect(),
  )
    .block(Block::default().borders(Borders::ALL).title(format!("Command Center | Service: {}", service)))
    .highlight_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
    .select(match app.current_tab {
      DashboardTab::Tasks => 0,
      DashboardTab::Details => 1,
    });
  f.render_widget(tabs, chunks[0]);

  match app.current_tab {
    DashboardTab::Tasks => render_tasks(f, app, chunks[1]),
    DashboardTab::Details => render_details(f, app, chunks[1]),
  }

  let status_line = match &app.status {
    Some(status) if status.is_error => Span::styled(status.text.clone(), Style::default().fg(Color::Red)),
    Some(status) => Span::styled(status.text.clone(), Style::default().fg(Color::Green)),
    None => Span::raw("Ready."),
  };
  let mut footer_spans = vec![];
  if busy {
    footer_spans.push(Span::raw(format!("{} ", SPINNER_FRAMES[app.spinner_index])));
  }
  footer_spans.push(status_line);
  let footer = Paragraph::new(Spans::from(footer_spans))
    .block(Block::default().borders(Borders::ALL).title("r: Refresh | Enter/x: Run | e: Toggle | d: Duplicate | ←/→: Tabs | q: Quit"));
  f.render_widget(footer, chunks[2]);
}

fn render_tasks<B: Backend>(f: &mut tui::Frame<B>, app: &mut App, area: Rect) {
  let header = Row::new(vec!["Name", "Cron", "Next Run", "Enabled", "Timeout"])
    .style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD));
  let rows = app.tasks.iter().map(|t| {
    let style = if t.enabled { Style::default() } else { Style::default().fg(Color::DarkGray) };
    Row::new(vec![
      Cell::from(t.name.clone()),
      Cell::from(t.cron_schedule.clone()),
      Cell::from(format_timestamp(t.next_execution)),
      Cell::from(if t.enabled { "Yes" } else { "No" }),
      Cell::from(format!("{} ms", t.timeout)),
    ])
      .style(style)
  });
  let widths = [
    Constraint::Percentage(30),
    Constraint::Percentage(20),
    Constraint::Percentage(25),
    Constraint::Percentage(10),
    Constraint::Percentage(15),
  ];
  let table = Table::new(rows)
    .header(header)
    .block(Block::default().borders(Borders::ALL).title(format!("Scheduled Tasks ({})", app.tasks.len())))
    .widths(&widths)
    .highlight_style(Style::default().bg(Color::Blue))
    .highlight_symbol("> ");
  f.render_stateful_widget(table, area, &mut app.table_state);
}

fn render_details<B: Backend>(f: &mut tui::Frame<B>, app: &App, area: Rect) {
  let lines = match app.selected() {
    Some(t) => {
      let field = |label: &str, value: String| {
        Spans::from(vec![
          Span::styled(format!("{:<22}", label), Style::default().add_modifier(Modifier::BOLD)),
          Span::raw(value),
        ])
      };
      vec![
        field("ID", t.id.map(|id| id.to_string()).unwrap_or_else(|| "-".into())),
        field("Name", t.name.clone()),
        field("Cron", t.cron_schedule.clone()),
        field("Action", t.action_name.clone()),
        field("Function", t.action_function.clone()),
        field("Configuration", t.action_configuration.clone()),
        field("Timeout", format!("{} ms", t.timeout)),
        field("Next Run", format_timestamp(t.next_execution)),
        field("Enabled", t.enabled.to_string()),
        field("Immediate", t.immediate.to_string()),
        field("Blackout Start", format_timestamp(t.blackout_start)),
        field("Blackout End", format_timestamp(t.blackout_end)),
      ]
    }
    None => vec![Spans::from(Span::raw("No task selected"))],
  };
  let details = Paragraph::new(lines)
    .block(Block::default().borders(Borders::ALL).title("Task Details"));
  f.render_widget(details, area);
}
