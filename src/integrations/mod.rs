pub mod claude;
pub mod tmux;
