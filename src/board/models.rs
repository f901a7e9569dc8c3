use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ordering::Ordered;

/// Anything with a stable database id.
pub trait Identified {
    fn id(&self) -> i64;
}

/// A reference to another entity: either its bare id or the populated record.
///
/// Serialized untagged, so `7` and `{"id": 7, ...}` both deserialize. Code
/// that only needs the identity calls [`Ref::id`] and never inspects the shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Ref<T> {
    Id(i64),
    Populated(T),
}

impl<T: Identified> Ref<T> {
    pub fn id(&self) -> i64 {
        match self {
            Self::Id(id) => *id,
            Self::Populated(value) => value.id(),
        }
    }

    pub fn populated(&self) -> Option<&T> {
        match self {
            Self::Id(_) => None,
            Self::Populated(value) => Some(value),
        }
    }

    /// Drop any populated payload, keeping only the identity.
    pub fn normalize(&self) -> Ref<T> {
        Ref::Id(self.id())
    }

    /// Take `incoming`, unless it is a bare id for the entity `self` already
    /// holds populated.
    pub fn merge(&self, incoming: Ref<T>) -> Ref<T>
    where
        T: Clone,
    {
        let same_bare = matches!(incoming, Ref::Id(id) if id == self.id());
        if same_bare && self.populated().is_some() {
            self.clone()
        } else {
            incoming
        }
    }
}

impl<T> From<i64> for Ref<T> {
    fn from(id: i64) -> Self {
        Self::Id(id)
    }
}

pub type UserRef = Ref<User>;
pub type BoardRef = Ref<Board>;
pub type ProjectRef = Ref<Project>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub owner: UserRef,
    pub members: Vec<UserRef>,
    pub projects: Vec<ProjectRef>,
    pub created_at: String,
    pub updated_at: String,
}

impl Board {
    pub fn is_owner(&self, user_id: i64) -> bool {
        self.owner.id() == user_id
    }

    /// Owner or member.
    pub fn can_access(&self, user_id: i64) -> bool {
        self.is_owner(user_id) || self.members.iter().any(|m| m.id() == user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Planned,
    Active,
    Completed,
    Archived,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Archived => "archived",
        }
    }
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planned" => Ok(Self::Planned),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "archived" => Ok(Self::Archived),
            _ => Err(format!("Invalid project status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub owner: UserRef,
    pub members: Vec<UserRef>,
    pub board: BoardRef,
    pub order_in_board: i64,
    pub status: ProjectStatus,
    pub due_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Done => "done",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(Self::Todo),
            "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub due_date: Option<String>,
    pub project: ProjectRef,
    pub board: BoardRef,
    pub assignee: Option<UserRef>,
    pub creator: UserRef,
    pub last_modifier: UserRef,
    pub order_in_project: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl Identified for User {
    fn id(&self) -> i64 {
        self.id
    }
}

impl Identified for Board {
    fn id(&self) -> i64 {
        self.id
    }
}

impl Identified for Project {
    fn id(&self) -> i64 {
        self.id
    }
}

impl Identified for Task {
    fn id(&self) -> i64 {
        self.id
    }
}

impl Ordered for Project {
    fn order(&self) -> i64 {
        self.order_in_board
    }
    fn set_order(&mut self, order: i64) {
        self.order_in_board = order;
    }
}

impl Ordered for Task {
    fn order(&self) -> i64 {
        self.order_in_project
    }
    fn set_order(&mut self, order: i64) {
        self.order_in_project = order;
    }
}

// API view types

/// A project with its tasks sorted by `orderInProject`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectWithTasks {
    #[serde(flatten)]
    pub project: Project,
    pub tasks: Vec<Task>,
}

/// Full board tree: projects sorted by `orderInBoard`, each with its tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardView {
    pub board: Board,
    pub projects: Vec<ProjectWithTasks>,
}
