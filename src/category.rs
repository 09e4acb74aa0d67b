//! Syscall naming tables and the category resolution policy.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::convert::Value;

/// Coarse call category carried by info frames
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Network,
    Filesystem,
    Process,
    Unknown,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Network => "network",
            Category::Filesystem => "filesystem",
            Category::Process => "process",
            Category::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static lookup data describing the instrumented call names
pub trait CallTable: Send + Sync {
    /// Numeric index of a call name, if the table knows it
    fn index_of(&self, name: &str) -> Option<u32>;

    fn is_network(&self, name: &str) -> bool;

    fn is_filesystem(&self, name: &str) -> bool;

    fn is_process(&self, name: &str) -> bool;
}

/// x86_64 Linux syscall numbers 0..=101
pub const SYSCALL_NAMES: &[&str] = &[
    "read", "write", "open", "close", "stat", "fstat", "lstat", "poll", "lseek", "mmap",
    "mprotect", "munmap", "brk", "rt_sigaction", "rt_sigprocmask", "rt_sigreturn", "ioctl",
    "pread64", "pwrite64", "readv", "writev", "access", "pipe", "select", "sched_yield",
    "mremap", "msync", "mincore", "madvise", "shmget", "shmat", "shmctl", "dup", "dup2",
    "pause", "nanosleep", "getitimer", "alarm", "setitimer", "getpid", "sendfile", "socket",
    "connect", "accept", "sendto", "recvfrom", "sendmsg", "recvmsg", "shutdown", "bind",
    "listen", "getsockname", "getpeername", "socketpair", "setsockopt", "getsockopt", "clone",
    "fork", "vfork", "execve", "exit", "wait4", "kill", "uname", "semget", "semop", "semctl",
    "shmdt", "msgget", "msgsnd", "msgrcv", "msgctl", "fcntl", "flock", "fsync", "fdatasync",
    "truncate", "ftruncate", "getdents", "getcwd", "chdir", "fchdir", "rename", "mkdir",
    "rmdir", "creat", "link", "unlink", "symlink", "readlink", "chmod", "fchmod", "chown",
    "fchown", "lchown", "umask", "gettimeofday", "getrlimit", "getrusage", "sysinfo", "times",
    "ptrace",
];

pub const NETWORK_CALLS: &[&str] = &[
    "socket", "socketpair", "connect", "accept", "accept4", "bind", "listen", "shutdown",
    "sendto", "recvfrom", "sendmsg", "recvmsg", "sendmmsg", "recvmmsg", "getsockname",
    "getpeername", "setsockopt", "getsockopt", "socketcall",
];

pub const FILESYSTEM_CALLS: &[&str] = &[
    "read", "write", "open", "close", "stat", "fstat", "lstat", "poll", "lseek", "access",
    "mkdir", "rename", "rmdir", "creat", "link", "unlink", "symlink", "readlink", "chmod",
    "fchmod", "chown", "fchown", "lchown", "umask",
];

pub const PROCESS_CALLS: &[&str] = &[
    "mmap", "mprotect", "brk", "clone", "fork", "vfork", "execve", "exit", "kill", "chdir",
    "fchdir", "sysinfo", "ptrace",
];

/// Built-in tables for Linux syscalls
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticCallTable;

impl CallTable for StaticCallTable {
    fn index_of(&self, name: &str) -> Option<u32> {
        SYSCALL_NAMES
            .iter()
            .position(|n| *n == name)
            .map(|i| i as u32)
    }

    fn is_network(&self, name: &str) -> bool {
        NETWORK_CALLS.contains(&name)
    }

    fn is_filesystem(&self, name: &str) -> bool {
        FILESYSTEM_CALLS.contains(&name)
    }

    fn is_process(&self, name: &str) -> bool {
        PROCESS_CALLS.contains(&name)
    }
}

/// Pick a category for a call name seen for the first time.
///
/// Table membership wins; otherwise any argument mentioning "filename"
/// marks the call as a filesystem call.
pub fn resolve_category(table: &dyn CallTable, name: &str, args: &[(String, Value)]) -> Category {
    if table.is_network(name) {
        return Category::Network;
    }
    if table.is_filesystem(name) {
        return Category::Filesystem;
    }
    if table.is_process(name) {
        return Category::Process;
    }

    let mentions_filename = args.iter().any(|(arg_name, value)| {
        arg_name.contains("filename") || value.as_str().is_some_and(|s| s.contains("filename"))
    });
    if mentions_filename {
        Category::Filesystem
    } else {
        Category::Unknown
    }
}
