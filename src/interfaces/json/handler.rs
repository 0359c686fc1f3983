use super::command::Command;
use super::response::Response;
use crate::application::orchestrator::PaymentOrchestrator;
use crate::application::presenter;
use crate::error::Result;

/// Executes one command and renders its outcome, success or failure, as a
/// wire response.
pub async fn handle(orchestrator: &PaymentOrchestrator, command: Command) -> Response {
    match dispatch(orchestrator, command).await {
        Ok(response) => response,
        Err(err) => Response::error(&err),
    }
}

async fn dispatch(orchestrator: &PaymentOrchestrator, command: Command) -> Result<Response> {
    Ok(match command {
        Command::CreateIntent {
            appointment_id,
            installments,
        } => {
            let record = orchestrator.create_intent(appointment_id, installments).await?;
            Response::intent_created(&record)
        }
        Command::SubmitInstrument {
            payment_id,
            method,
            details,
            installments,
        } => {
            let record = orchestrator
                .submit_instrument(payment_id, method, &details, installments)
                .await?;
            Response::held(&record)
        }
        Command::Confirm { payment_id, actor } => {
            Response::transition(&orchestrator.confirm_occurred(payment_id, actor).await?)
        }
        Command::Cancel {
            payment_id,
            actor,
            reason,
        } => Response::transition(&orchestrator.cancel(payment_id, actor, &reason).await?),
        Command::Status { payment_id } => {
            let record = orchestrator.get_status(payment_id).await?;
            Response::status(presenter::present(&record, orchestrator.now()))
        }
        Command::Sweep => Response::sweep(orchestrator.release_due().await?),
        Command::Reconcile { payment_id } => {
            Response::transition(&orchestrator.reconcile(payment_id).await?)
        }
    })
}
